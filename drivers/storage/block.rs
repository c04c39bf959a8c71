//! Block device capability
//!
//! The contract every storage driver implements and every consumer (the USB
//! mass-storage front end, the application) is written against.

use core::fmt;

/// Logical block size in bytes. Fixed for every device behind the contract.
pub const BLOCK_SIZE: usize = 512;

/// Errors returned by block devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Operation attempted before a successful `init`.
    NotInitialized,
    /// Card did not reach transfer-ready within the configured window.
    HardwareTimeout,
    /// Card controller reported a fatal status.
    HardwareFault,
    /// `lba + count` exceeds the reported block count.
    OutOfRange,
    /// Card absent, ejected or zero capacity.
    NotReady,
    /// Zero-length request or a buffer shorter than `count` blocks.
    InvalidBuffer,
    /// Rejected configuration values.
    InvalidConfig,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotInitialized => write!(f, "Device not initialized"),
            StorageError::HardwareTimeout => write!(f, "Operation timed out"),
            StorageError::HardwareFault => write!(f, "Hardware fault"),
            StorageError::OutOfRange => write!(f, "Block address out of range"),
            StorageError::NotReady => write!(f, "Device not ready"),
            StorageError::InvalidBuffer => write!(f, "Invalid transfer buffer"),
            StorageError::InvalidConfig => write!(f, "Invalid configuration"),
        }
    }
}

/// Block device abstraction consumed by the mass-storage front end.
///
/// Blocks are always [`BLOCK_SIZE`] bytes. A successful `write` only promises
/// the data reached the device's own cache; call `sync` for durability.
pub trait BlockDevice {
    /// Device can serve reads and writes.
    fn is_ready(&self) -> bool;

    /// Number of logical blocks, 0 when not ready.
    fn block_count(&self) -> u32;

    fn block_size(&self) -> u32 {
        BLOCK_SIZE as u32
    }

    /// Read `count` blocks starting at `lba` into `buf`.
    fn read(&mut self, lba: u32, buf: &mut [u8], count: u32) -> Result<(), StorageError>;

    /// Write `count` blocks starting at `lba` from `buf`.
    fn write(&mut self, lba: u32, buf: &[u8], count: u32) -> Result<(), StorageError>;

    /// Flush any write-back cache to the medium.
    fn sync(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Validate a transfer of `count` blocks at `lba` on a device holding
/// `block_count` blocks. Returns the byte length the transfer covers.
pub fn request_len(block_count: u32, lba: u32, count: u32, buf_len: usize) -> Result<usize, StorageError> {
    if count == 0 {
        return Err(StorageError::InvalidBuffer);
    }
    let len = (count as usize)
        .checked_mul(BLOCK_SIZE)
        .ok_or(StorageError::InvalidBuffer)?;
    if buf_len < len {
        return Err(StorageError::InvalidBuffer);
    }
    match lba.checked_add(count) {
        Some(end) if end <= block_count => Ok(len),
        _ => Err(StorageError::OutOfRange),
    }
}

/// Memory backed block device.
///
/// Useful as a RAM disk and as a stand-in medium when bringing up the USB
/// side without a card.
pub struct RamDisk<'a> {
    data: &'a mut [u8],
    ready: bool,
    reads: u32,
    writes: u32,
    syncs: u32,
}

impl<'a> RamDisk<'a> {
    /// Wrap `data`; trailing bytes that do not fill a whole block are unused.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data, ready: true, reads: 0, writes: 0, syncs: 0 }
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    /// Completed read calls.
    pub fn read_count(&self) -> u32 {
        self.reads
    }

    /// Completed write calls.
    pub fn write_count(&self) -> u32 {
        self.writes
    }

    pub fn sync_count(&self) -> u32 {
        self.syncs
    }

    fn blocks(&self) -> u32 {
        (self.data.len() / BLOCK_SIZE) as u32
    }
}

impl BlockDevice for RamDisk<'_> {
    fn is_ready(&self) -> bool {
        self.ready && self.blocks() > 0
    }

    fn block_count(&self) -> u32 {
        if self.ready {
            self.blocks()
        } else {
            0
        }
    }

    fn read(&mut self, lba: u32, buf: &mut [u8], count: u32) -> Result<(), StorageError> {
        if !self.is_ready() {
            return Err(StorageError::NotReady);
        }
        let len = request_len(self.blocks(), lba, count, buf.len())?;
        let start = lba as usize * BLOCK_SIZE;
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        self.reads += 1;
        Ok(())
    }

    fn write(&mut self, lba: u32, buf: &[u8], count: u32) -> Result<(), StorageError> {
        if !self.is_ready() {
            return Err(StorageError::NotReady);
        }
        let len = request_len(self.blocks(), lba, count, buf.len())?;
        let start = lba as usize * BLOCK_SIZE;
        self.data[start..start + len].copy_from_slice(&buf[..len]);
        self.writes += 1;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.syncs += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_len_bounds() {
        assert_eq!(request_len(16, 0, 1, 512), Ok(512));
        assert_eq!(request_len(16, 15, 1, 512), Ok(512));
        assert_eq!(request_len(16, 16, 1, 512), Err(StorageError::OutOfRange));
        assert_eq!(request_len(16, 15, 2, 1024), Err(StorageError::OutOfRange));
        assert_eq!(request_len(16, u32::MAX, 2, 1024), Err(StorageError::OutOfRange));
    }

    #[test]
    fn test_request_len_rejects_bad_buffers() {
        assert_eq!(request_len(16, 0, 0, 512), Err(StorageError::InvalidBuffer));
        assert_eq!(request_len(16, 0, 2, 1000), Err(StorageError::InvalidBuffer));
    }

    #[test]
    fn test_ram_disk_round_trip() {
        let mut backing = vec![0u8; 16 * BLOCK_SIZE];
        let mut disk = RamDisk::new(&mut backing);
        let pattern: Vec<u8> = (0..2 * BLOCK_SIZE).map(|i| (i % 251) as u8).collect();

        disk.write(3, &pattern, 2).unwrap();
        let mut out = vec![0u8; 2 * BLOCK_SIZE];
        disk.read(3, &mut out, 2).unwrap();

        assert_eq!(out, pattern);
        assert_eq!(disk.write_count(), 1);
        assert_eq!(disk.read_count(), 1);
    }

    #[test]
    fn test_ram_disk_not_ready() {
        let mut backing = vec![0u8; 4 * BLOCK_SIZE];
        let mut disk = RamDisk::new(&mut backing);
        disk.set_ready(false);

        let mut buf = [0u8; BLOCK_SIZE];
        assert!(!disk.is_ready());
        assert_eq!(disk.block_count(), 0);
        assert_eq!(disk.read(0, &mut buf, 1), Err(StorageError::NotReady));
        assert_eq!(disk.write(0, &buf, 1), Err(StorageError::NotReady));
    }
}
