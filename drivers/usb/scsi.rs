//! SCSI sense data and identification strings for the MSC front end

use heapless::String;

use crate::drivers::storage::block::StorageError;

/// SCSI sense keys used by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SenseKey {
    NoSense = 0x00,
    NotReady = 0x02,
    MediumError = 0x03,
    HardwareError = 0x04,
    IllegalRequest = 0x05,
}

/// Sense key plus additional sense code and qualifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sense {
    pub key: SenseKey,
    pub asc: u8,
    pub ascq: u8,
}

impl Sense {
    pub const NO_SENSE: Sense = Sense::new(SenseKey::NoSense, 0x00, 0x00);
    pub const MEDIUM_NOT_PRESENT: Sense = Sense::new(SenseKey::NotReady, 0x3A, 0x00);
    pub const UNRECOVERED_READ_ERROR: Sense = Sense::new(SenseKey::MediumError, 0x11, 0x00);
    pub const WRITE_ERROR: Sense = Sense::new(SenseKey::MediumError, 0x0C, 0x00);
    pub const HARDWARE_ERROR: Sense = Sense::new(SenseKey::HardwareError, 0x00, 0x00);
    pub const INVALID_COMMAND: Sense = Sense::new(SenseKey::IllegalRequest, 0x20, 0x00);
    pub const LBA_OUT_OF_RANGE: Sense = Sense::new(SenseKey::IllegalRequest, 0x21, 0x00);
    pub const INVALID_FIELD_IN_CDB: Sense = Sense::new(SenseKey::IllegalRequest, 0x24, 0x00);

    pub const fn new(key: SenseKey, asc: u8, ascq: u8) -> Self {
        Self { key, asc, ascq }
    }

    /// Sense for a failed READ(10).
    pub fn for_read(err: StorageError) -> Sense {
        match err {
            StorageError::HardwareTimeout | StorageError::HardwareFault => Sense::UNRECOVERED_READ_ERROR,
            other => Sense::from(other),
        }
    }

    /// Sense for a failed WRITE(10).
    pub fn for_write(err: StorageError) -> Sense {
        match err {
            StorageError::HardwareTimeout | StorageError::HardwareFault => Sense::WRITE_ERROR,
            other => Sense::from(other),
        }
    }

    /// Fixed-format sense data as returned by REQUEST SENSE.
    pub fn to_bytes(&self) -> [u8; 18] {
        let mut data = [0u8; 18];
        data[0] = 0x70;
        data[2] = self.key as u8;
        data[7] = 10;
        data[12] = self.asc;
        data[13] = self.ascq;
        data
    }
}

impl From<StorageError> for Sense {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotInitialized | StorageError::NotReady => Sense::MEDIUM_NOT_PRESENT,
            StorageError::OutOfRange => Sense::LBA_OUT_OF_RANGE,
            StorageError::InvalidBuffer => Sense::INVALID_FIELD_IN_CDB,
            StorageError::HardwareTimeout | StorageError::HardwareFault | StorageError::InvalidConfig => {
                Sense::HARDWARE_ERROR
            }
        }
    }
}

/// Vendor, product and revision reported by INQUIRY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    vendor: String<8>,
    product: String<16>,
    revision: String<4>,
}

impl Identity {
    /// Strings longer than the SCSI fields are cut; non-ASCII characters
    /// become `?`.
    pub fn new(vendor: &str, product: &str, revision: &str) -> Self {
        Self {
            vendor: field(vendor),
            product: field(product),
            revision: field(revision),
        }
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Space padded INQUIRY fields.
    pub fn inquiry(&self) -> InquiryStrings {
        InquiryStrings {
            vendor: padded(&self.vendor),
            product: padded(&self.product),
            revision: padded(&self.revision),
        }
    }
}

impl Default for Identity {
    fn default() -> Self {
        Identity::new("USB", "Mass Storage", "1.0")
    }
}

/// INQUIRY identification fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InquiryStrings {
    pub vendor: [u8; 8],
    pub product: [u8; 16],
    pub revision: [u8; 4],
}

fn field<const N: usize>(text: &str) -> String<N> {
    let mut out = String::new();
    for c in text.chars() {
        let c = if c.is_ascii() && !c.is_ascii_control() { c } else { '?' };
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

fn padded<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [b' '; N];
    let len = text.len().min(N);
    out[..len].copy_from_slice(&text.as_bytes()[..len]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sense_mapping() {
        assert_eq!(Sense::from(StorageError::NotReady), Sense::MEDIUM_NOT_PRESENT);
        assert_eq!(Sense::from(StorageError::OutOfRange), Sense::LBA_OUT_OF_RANGE);
        assert_eq!(Sense::for_read(StorageError::HardwareTimeout), Sense::UNRECOVERED_READ_ERROR);
        assert_eq!(Sense::for_write(StorageError::HardwareFault), Sense::WRITE_ERROR);
        assert_eq!(Sense::for_write(StorageError::OutOfRange), Sense::LBA_OUT_OF_RANGE);
    }

    #[test]
    fn test_fixed_format() {
        let data = Sense::MEDIUM_NOT_PRESENT.to_bytes();
        assert_eq!(data[0], 0x70);
        assert_eq!(data[2], 0x02);
        assert_eq!(data[7], 10);
        assert_eq!(data[12], 0x3A);
    }

    #[test]
    fn test_identity_padding_and_truncation() {
        let id = Identity::new("OkoRelay-Storage", "SD Card", "3.0.0");
        assert_eq!(id.vendor(), "OkoRelay");
        assert_eq!(id.revision(), "3.0.");

        let inquiry = id.inquiry();
        assert_eq!(&inquiry.vendor, b"OkoRelay");
        assert_eq!(&inquiry.product, b"SD Card         ");
        assert_eq!(&inquiry.revision, b"3.0.");
    }

    #[test]
    fn test_identity_default() {
        let inquiry = Identity::default().inquiry();
        assert_eq!(&inquiry.vendor, b"USB     ");
        assert_eq!(&inquiry.product, b"Mass Storage    ");
        assert_eq!(&inquiry.revision, b"1.0 ");
    }
}
