//! Sector translation layer
//!
//! Presents 512-byte logical blocks on media whose physical sector is larger
//! (1024 or 2048 bytes). A single physical sector is cached and written back
//! lazily, on the next address miss or an explicit flush. Logical writes
//! narrower than the physical sector go through read-modify-write.

use log::trace;

use crate::drivers::storage::block::{StorageError, BLOCK_SIZE};

/// Largest physical sector the cache can hold.
pub const MAX_PHYS_BLOCK_SIZE: usize = 2048;

/// Single physical sector transfers.
pub trait SectorIo {
    fn read_sector(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write_sector(&mut self, addr: u32, buf: &[u8]) -> Result<(), StorageError>;
}

/// One-entry write-back cache over physical sectors.
pub struct SectorCache {
    sector_size: usize,
    addr: Option<u32>,
    dirty: bool,
    buf: [u8; MAX_PHYS_BLOCK_SIZE],
}

impl SectorCache {
    pub const fn new() -> Self {
        Self {
            sector_size: BLOCK_SIZE,
            addr: None,
            dirty: false,
            buf: [0; MAX_PHYS_BLOCK_SIZE],
        }
    }

    /// Retarget the cache at media with `sector_size` byte sectors. Drops the
    /// current entry without writing it back.
    pub fn set_sector_size(&mut self, sector_size: usize) -> Result<(), StorageError> {
        if sector_size < BLOCK_SIZE || sector_size > MAX_PHYS_BLOCK_SIZE || sector_size % BLOCK_SIZE != 0 {
            return Err(StorageError::InvalidConfig);
        }
        self.sector_size = sector_size;
        self.invalidate();
        Ok(())
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Logical blocks per physical sector.
    pub fn ratio(&self) -> u32 {
        (self.sector_size / BLOCK_SIZE) as u32
    }

    /// Physical sector and byte offset holding logical block `lba`.
    pub fn locate(&self, lba: u32) -> (u32, usize) {
        let ratio = self.ratio();
        (lba / ratio, (lba % ratio) as usize * BLOCK_SIZE)
    }

    /// Physical sector currently cached.
    pub fn cached(&self) -> Option<u32> {
        self.addr
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn invalidate(&mut self) {
        self.addr = None;
        self.dirty = false;
    }

    /// Write the cached sector back if it is dirty. A failed write leaves the
    /// entry dirty so the next flush retries it.
    pub fn flush<I: SectorIo + ?Sized>(&mut self, io: &mut I) -> Result<(), StorageError> {
        let addr = match self.addr {
            Some(addr) if self.dirty => addr,
            _ => return Ok(()),
        };
        trace!("stl: write back sector {}", addr);
        io.write_sector(addr, &self.buf[..self.sector_size])?;
        self.dirty = false;
        Ok(())
    }

    /// Point the cache at `addr`, writing back the previous entry first.
    fn load<I: SectorIo + ?Sized>(&mut self, io: &mut I, addr: u32) -> Result<(), StorageError> {
        if self.addr == Some(addr) {
            return Ok(());
        }
        self.flush(io)?;
        self.addr = None;
        trace!("stl: fill sector {}", addr);
        io.read_sector(addr, &mut self.buf[..self.sector_size])?;
        self.addr = Some(addr);
        Ok(())
    }

    pub fn read_block<I: SectorIo + ?Sized>(&mut self, io: &mut I, lba: u32, out: &mut [u8]) -> Result<(), StorageError> {
        let (addr, offset) = self.locate(lba);
        self.load(io, addr)?;
        out[..BLOCK_SIZE].copy_from_slice(&self.buf[offset..offset + BLOCK_SIZE]);
        Ok(())
    }

    pub fn write_block<I: SectorIo + ?Sized>(&mut self, io: &mut I, lba: u32, data: &[u8]) -> Result<(), StorageError> {
        let (addr, offset) = self.locate(lba);
        self.load(io, addr)?;
        self.buf[offset..offset + BLOCK_SIZE].copy_from_slice(&data[..BLOCK_SIZE]);
        self.dirty = true;
        Ok(())
    }

    /// Read consecutive logical blocks into `buf`, one block at a time.
    pub fn read<I: SectorIo + ?Sized>(&mut self, io: &mut I, lba: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        for (i, block) in buf.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            self.read_block(io, lba + i as u32, block)?;
        }
        Ok(())
    }

    /// Write consecutive logical blocks from `buf`, one block at a time.
    pub fn write<I: SectorIo + ?Sized>(&mut self, io: &mut I, lba: u32, buf: &[u8]) -> Result<(), StorageError> {
        for (i, block) in buf.chunks_exact(BLOCK_SIZE).enumerate() {
            self.write_block(io, lba + i as u32, block)?;
        }
        Ok(())
    }
}

impl Default for SectorCache {
    fn default() -> Self {
        Self::new()
    }
}
