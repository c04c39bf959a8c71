//! USB device-side class support.

pub mod mass_storage;
pub mod scsi;
