//! Card controller configuration and board presets.

use heapless::Vec;

use crate::drivers::storage::block::StorageError;
use crate::drivers::storage::card::BusWidth;

/// A GPIO pin given as port index (0 = A, 1 = B, ...) and pin number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioPin {
    pub port_index: u8,
    pub pin_number: u8,
}

impl GpioPin {
    pub const fn new(port_index: u8, pin_number: u8) -> Self {
        Self { port_index, pin_number }
    }

    /// Single-bit mask for the pin within its port, `None` past pin 15.
    pub fn mask(&self) -> Option<u16> {
        1u16.checked_shl(self.pin_number as u32)
    }
}

/// SDMMC controller configuration.
///
/// Clock divisors are raw CLKDIV values, SDMMC_CK = SDMMCCLK / (CLKDIV + 2).
/// The defaults give 400 kHz and 24 MHz from a 240 MHz kernel clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdmmcConfig {
    /// 1 = SDMMC1, 2 = SDMMC2.
    pub sdmmc_index: u8,
    pub clk: GpioPin,
    pub cmd: GpioPin,
    pub d0: GpioPin,
    pub d1: GpioPin,
    pub d2: GpioPin,
    pub d3: GpioPin,
    pub bus_width: BusWidth,
    /// Divisor used during identification.
    pub init_clock_div: u32,
    /// Divisor used once the bus is configured.
    pub normal_clock_div: u32,
    pub init_timeout_ms: u32,
    pub rw_timeout_ms: u32,
    pub ready_timeout_ms: u32,
}

impl Default for SdmmcConfig {
    fn default() -> Self {
        Self {
            sdmmc_index: 1,
            clk: GpioPin::new(2, 12),
            cmd: GpioPin::new(3, 2),
            d0: GpioPin::new(2, 8),
            d1: GpioPin::new(2, 9),
            d2: GpioPin::new(2, 10),
            d3: GpioPin::new(2, 11),
            bus_width: BusWidth::Four,
            init_clock_div: 598,
            normal_clock_div: 8,
            init_timeout_ms: 2000,
            rw_timeout_ms: 2000,
            ready_timeout_ms: 500,
        }
    }
}

impl SdmmcConfig {
    pub fn validate(&self) -> Result<(), StorageError> {
        if !(1..=2).contains(&self.sdmmc_index) {
            return Err(StorageError::InvalidConfig);
        }
        if self.init_clock_div == 0 || self.normal_clock_div == 0 {
            return Err(StorageError::InvalidConfig);
        }
        if self.init_timeout_ms == 0 || self.rw_timeout_ms == 0 || self.ready_timeout_ms == 0 {
            return Err(StorageError::InvalidConfig);
        }
        if self.pins().iter().any(|pin| pin.mask().is_none()) {
            return Err(StorageError::InvalidConfig);
        }
        Ok(())
    }

    /// Pins in use for the configured bus width: clk, cmd, then data lines.
    pub fn pins(&self) -> Vec<GpioPin, 6> {
        let mut pins = Vec::new();
        let used: &[GpioPin] = match self.bus_width {
            BusWidth::One => &[self.clk, self.cmd, self.d0],
            BusWidth::Four => &[self.clk, self.cmd, self.d0, self.d1, self.d2, self.d3],
        };
        // Capacity matches the widest bus.
        let _ = pins.extend_from_slice(used);
        pins
    }
}

/// Board presets.
pub mod presets {
    use super::SdmmcConfig;

    /// SDMMC1 on PC8-PC12 and PD2, 4-bit.
    pub fn stm32h7_standard() -> SdmmcConfig {
        SdmmcConfig::default()
    }

    pub fn oko_relay() -> SdmmcConfig {
        stm32h7_standard()
    }

    pub fn devebox_h743() -> SdmmcConfig {
        stm32h7_standard()
    }

    pub fn weact_h743() -> SdmmcConfig {
        stm32h7_standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = presets::oko_relay();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.init_clock_div, 598);
        assert_eq!(cfg.normal_clock_div, 8);
    }

    #[test]
    fn test_rejects_zero_divisor_and_timeout() {
        let mut cfg = SdmmcConfig::default();
        cfg.normal_clock_div = 0;
        assert_eq!(cfg.validate(), Err(StorageError::InvalidConfig));

        let mut cfg = SdmmcConfig::default();
        cfg.rw_timeout_ms = 0;
        assert_eq!(cfg.validate(), Err(StorageError::InvalidConfig));
    }

    #[test]
    fn test_pins_follow_bus_width() {
        let mut cfg = SdmmcConfig::default();
        assert_eq!(cfg.pins().len(), 6);
        cfg.bus_width = BusWidth::One;
        assert_eq!(cfg.pins().as_slice(), &[cfg.clk, cfg.cmd, cfg.d0]);
        assert_eq!(cfg.clk.mask(), Some(1 << 12));
    }

    #[test]
    fn test_pin_out_of_port_range() {
        assert_eq!(GpioPin::new(0, 15).mask(), Some(0x8000));
        assert_eq!(GpioPin::new(0, 16).mask(), None);
        assert_eq!(GpioPin::new(0, 200).mask(), None);

        let mut cfg = SdmmcConfig::default();
        cfg.d3.pin_number = 16;
        assert_eq!(cfg.validate(), Err(StorageError::InvalidConfig));
        cfg.bus_width = BusWidth::One;
        assert_eq!(cfg.validate(), Ok(()));
    }
}
