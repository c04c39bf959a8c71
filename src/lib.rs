//! SD/eMMC card as a USB mass-storage block device.
//!
//! The card driver ([`SdmmcBlockDevice`]) turns a platform card controller
//! into a 512-byte [`BlockDevice`]; the mass-storage adapter ([`MSC`])
//! serves that device to a USB MSC class driver.
//!
//! ```ignore
//! static SD: Mutex<SdmmcBlockDevice<Sdmmc1, SysTick>> = ...;
//!
//! SD.lock().init(presets::oko_relay())?;
//! MSC.attach(&SD);
//! ```

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod drivers;
pub mod platform;

pub use config::{presets, GpioPin, SdmmcConfig};
pub use drivers::storage::block::{BlockDevice, RamDisk, StorageError, BLOCK_SIZE};
pub use drivers::storage::card::{BusWidth, CardGeometry, CardHost, HostError};
pub use drivers::storage::sdmmc::{CardInfo, Diagnostics, SdmmcBlockDevice, SdmmcState};
pub use drivers::usb::mass_storage::{MassStorage, SharedBlockDevice, MSC};
pub use drivers::usb::scsi::{Identity, InquiryStrings, Sense, SenseKey};
pub use platform::{Clock, PlatformHooks};
