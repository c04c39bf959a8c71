//! SD card host interface and card register decoding
//!
//! `CardHost` is the seam to the platform's card controller (SDMMC peripheral
//! plus its HAL). Everything above it only sees decoded card status and
//! geometry.

use bit_field::BitField;
use bitflags::bitflags;

use crate::drivers::storage::block::StorageError;

/// Data bus width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    One,
    Four,
}

/// Errors reported by the card controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    Timeout,
    /// Controller error code.
    Fault(u32),
}

impl From<HostError> for StorageError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Timeout => StorageError::HardwareTimeout,
            HostError::Fault(_) => StorageError::HardwareFault,
        }
    }
}

/// Geometry as reported by the controller after identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CardGeometry {
    /// Physical blocks.
    pub block_count: u32,
    /// Physical block size in bytes.
    pub block_size: u32,
    pub card_type: u32,
    pub card_version: u32,
}

/// Card controller primitives supplied by the platform.
///
/// Pin muxing and peripheral clocks are already set up when `power_up` runs.
pub trait CardHost {
    /// Power the bus in 1-bit mode at `clock_div` and run card identification.
    fn power_up(&mut self, clock_div: u32, timeout_ms: u32) -> Result<(), HostError>;

    fn geometry(&mut self) -> Result<CardGeometry, HostError>;

    /// Raw CSD register, most significant word first.
    fn csd(&self) -> [u32; 4];

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError>;

    fn set_clock_divisor(&mut self, clock_div: u32) -> Result<(), HostError>;

    /// Transfer exactly one physical sector at address `addr`.
    fn read_sector(&mut self, addr: u32, buf: &mut [u8], timeout_ms: u32) -> Result<(), HostError>;

    /// Transfer exactly one physical sector at address `addr`.
    fn write_sector(&mut self, addr: u32, buf: &[u8], timeout_ms: u32) -> Result<(), HostError>;

    /// Raw R1 card status (CMD13).
    fn card_status(&mut self) -> Result<u32, HostError>;

    /// Release the bus and gate the peripheral clock.
    fn power_down(&mut self);

    fn host_state(&self) -> u32 {
        0
    }

    fn host_error(&self) -> u32 {
        0
    }

    /// Controller status register.
    fn status_register(&self) -> u32 {
        0
    }
}

bitflags! {
    /// Error and status bits of the R1 card status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u32 {
        const OUT_OF_RANGE = 1 << 31;
        const ADDRESS_ERROR = 1 << 30;
        const BLOCK_LEN_ERROR = 1 << 29;
        const ERASE_SEQ_ERROR = 1 << 28;
        const ERASE_PARAM = 1 << 27;
        const WP_VIOLATION = 1 << 26;
        const CARD_IS_LOCKED = 1 << 25;
        const LOCK_UNLOCK_FAILED = 1 << 24;
        const COM_CRC_ERROR = 1 << 23;
        const ILLEGAL_COMMAND = 1 << 22;
        const CARD_ECC_FAILED = 1 << 21;
        const CC_ERROR = 1 << 20;
        const ERROR = 1 << 19;
        const CSD_OVERWRITE = 1 << 16;
        const WP_ERASE_SKIP = 1 << 15;
        const ERASE_RESET = 1 << 13;
        const READY_FOR_DATA = 1 << 8;
        const APP_CMD = 1 << 5;
        const AKE_SEQ_ERROR = 1 << 3;
    }
}

impl CardStatus {
    /// Bits that mean the last transfer failed.
    pub const ERRORS: CardStatus = CardStatus::OUT_OF_RANGE
        .union(CardStatus::ADDRESS_ERROR)
        .union(CardStatus::BLOCK_LEN_ERROR)
        .union(CardStatus::WP_VIOLATION)
        .union(CardStatus::LOCK_UNLOCK_FAILED)
        .union(CardStatus::COM_CRC_ERROR)
        .union(CardStatus::ILLEGAL_COMMAND)
        .union(CardStatus::CARD_ECC_FAILED)
        .union(CardStatus::CC_ERROR)
        .union(CardStatus::ERROR);

    pub fn has_error(&self) -> bool {
        self.intersects(Self::ERRORS)
    }
}

/// CURRENT_STATE field of the R1 card status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Ready,
    Identification,
    Standby,
    Transfer,
    SendingData,
    ReceivingData,
    Programming,
    Disconnect,
}

impl CardState {
    pub fn from_status(status: u32) -> Option<CardState> {
        let state = match status.get_bits(9..13) {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Identification,
            3 => CardState::Standby,
            4 => CardState::Transfer,
            5 => CardState::SendingData,
            6 => CardState::ReceivingData,
            7 => CardState::Programming,
            8 => CardState::Disconnect,
            _ => return None,
        };
        Some(state)
    }

    /// R1 value with only the CURRENT_STATE field set.
    pub fn to_status(self) -> u32 {
        let mut status = 0u32;
        status.set_bits(9..13, self as u32);
        status
    }
}

/// Capacity decoded from a CSD register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsdGeometry {
    pub block_count: u32,
    pub block_size: u32,
}

/// Card-Specific Data register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csd(u128);

impl Csd {
    /// Build from the four response words, most significant first.
    pub fn from_words(words: [u32; 4]) -> Self {
        let raw = (words[0] as u128) << 96
            | (words[1] as u128) << 64
            | (words[2] as u128) << 32
            | words[3] as u128;
        Csd(raw)
    }

    pub fn structure(&self) -> u8 {
        self.0.get_bits(126..128) as u8
    }

    /// Capacity and native block size, `None` for unknown layouts or cards
    /// over 2 TiB.
    pub fn geometry(&self) -> Option<CsdGeometry> {
        match self.structure() {
            0 => {
                let read_bl_len = self.0.get_bits(80..84) as u32;
                if !(9..=11).contains(&read_bl_len) {
                    return None;
                }
                let c_size = self.0.get_bits(62..74) as u32;
                let c_size_mult = self.0.get_bits(47..50) as u32;
                Some(CsdGeometry {
                    block_count: (c_size + 1) << (c_size_mult + 2),
                    block_size: 1 << read_bl_len,
                })
            }
            1 => {
                let c_size = self.0.get_bits(48..70) as u32;
                let block_count = (c_size + 1).checked_mul(1024)?;
                Some(CsdGeometry { block_count, block_size: 512 })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(raw: u128) -> [u32; 4] {
        [(raw >> 96) as u32, (raw >> 64) as u32, (raw >> 32) as u32, raw as u32]
    }

    #[test]
    fn test_card_state_decode() {
        let status = CardState::Transfer.to_status() | CardStatus::READY_FOR_DATA.bits();
        assert_eq!(status, 0x900);
        assert_eq!(CardState::from_status(status), Some(CardState::Transfer));
        assert_eq!(CardState::from_status(CardState::Programming.to_status()), Some(CardState::Programming));
        assert_eq!(CardState::from_status(0xF << 9), None);
    }

    #[test]
    fn test_card_status_errors() {
        assert!(CardStatus::from_bits_truncate(1 << 21).has_error());
        assert!(!CardStatus::from_bits_truncate(0x900).has_error());
    }

    #[test]
    fn test_csd_v2_capacity() {
        let c_size: u128 = 0x3B37;
        let csd = Csd::from_words(words(1 << 126 | c_size << 48));
        assert_eq!(csd.structure(), 1);
        assert_eq!(
            csd.geometry(),
            Some(CsdGeometry { block_count: (0x3B37 + 1) * 1024, block_size: 512 })
        );
    }

    #[test]
    fn test_csd_v1_large_blocks() {
        let raw: u128 = 10 << 80 | 4095 << 62 | 7 << 47;
        let csd = Csd::from_words(words(raw));
        assert_eq!(csd.structure(), 0);
        assert_eq!(
            csd.geometry(),
            Some(CsdGeometry { block_count: 4096 << 9, block_size: 1024 })
        );
    }

    #[test]
    fn test_csd_unknown_structure() {
        assert_eq!(Csd::from_words(words(3 << 126)).geometry(), None);
    }
}
