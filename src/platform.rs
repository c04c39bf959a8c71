//! Platform services the drivers consume.

use crate::config::SdmmcConfig;

/// Monotonic millisecond time base with a blocking delay.
pub trait Clock {
    /// Milliseconds since boot. Wraps after ~49 days.
    fn now_ms(&self) -> u32;

    fn delay_ms(&mut self, ms: u32);
}

/// Board bring-up callbacks run by the card driver around the bus lifetime.
///
/// The defaults do nothing, for boards whose firmware muxes the SDMMC pins
/// before the driver starts.
#[derive(Clone, Copy)]
pub struct PlatformHooks {
    /// Route clk/cmd/data pins to the controller.
    pub init_pins: fn(&SdmmcConfig),
    /// Return the pins to their reset state.
    pub deinit_pins: fn(&SdmmcConfig),
}

fn no_pins(_: &SdmmcConfig) {}

impl Default for PlatformHooks {
    fn default() -> Self {
        Self { init_pins: no_pins, deinit_pins: no_pins }
    }
}
