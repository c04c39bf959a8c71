//! Test doubles for the storage drivers.

use crate::drivers::storage::block::StorageError;
use crate::drivers::storage::card::{BusWidth, CardGeometry, CardHost, CardState, CardStatus, HostError};
use crate::drivers::storage::stl::SectorIo;
use crate::platform::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumOp {
    Read(u32),
    Write(u32),
}

/// Sector-addressed memory with an operation log.
pub struct MockMedium {
    sector_size: usize,
    data: Vec<u8>,
    pub ops: Vec<MediumOp>,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl MockMedium {
    pub fn new(sector_size: usize, sectors: usize) -> Self {
        Self {
            sector_size,
            data: vec![0; sector_size * sectors],
            ops: Vec::new(),
            fail_reads: false,
            fail_writes: false,
        }
    }

    pub fn sector(&self, addr: u32) -> &[u8] {
        let start = addr as usize * self.sector_size;
        &self.data[start..start + self.sector_size]
    }

    pub fn fill_sector(&mut self, addr: u32, value: u8) {
        let start = addr as usize * self.sector_size;
        self.data[start..start + self.sector_size].fill(value);
    }

    pub fn writes(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, MediumOp::Write(_))).count()
    }
}

impl SectorIo for MockMedium {
    fn read_sector(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        if self.fail_reads {
            return Err(StorageError::HardwareFault);
        }
        self.ops.push(MediumOp::Read(addr));
        buf.copy_from_slice(self.sector(addr));
        Ok(())
    }

    fn write_sector(&mut self, addr: u32, buf: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::HardwareFault);
        }
        self.ops.push(MediumOp::Write(addr));
        let start = addr as usize * self.sector_size;
        self.data[start..start + self.sector_size].copy_from_slice(buf);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOp {
    PowerUp(u32),
    BusWidth(BusWidth),
    ClockDiv(u32),
    Read(u32),
    Write(u32),
    PowerDown,
}

/// Card controller backed by memory.
pub struct MockHost {
    pub geometry: CardGeometry,
    pub csd: [u32; 4],
    pub medium: Vec<u8>,
    pub ops: Vec<HostOp>,
    pub fail_power_up: bool,
    pub fail_bus_width: bool,
    pub fail_reads: bool,
    pub fail_writes: bool,
    /// Status polls answered with PRG before the card returns to TRAN.
    pub busy_polls: u32,
    /// Never leave PRG.
    pub stuck: bool,
    /// Extra R1 bits reported on every poll.
    pub status_bits: CardStatus,
}

impl MockHost {
    /// Card with `block_count` physical sectors of `block_size` bytes.
    pub fn new(block_count: u32, block_size: u32) -> Self {
        Self {
            geometry: CardGeometry { block_count, block_size, card_type: 1, card_version: 2 },
            csd: [0; 4],
            medium: vec![0; block_count as usize * block_size as usize],
            ops: Vec::new(),
            fail_power_up: false,
            fail_bus_width: false,
            fail_reads: false,
            fail_writes: false,
            busy_polls: 0,
            stuck: false,
            status_bits: CardStatus::READY_FOR_DATA,
        }
    }

    pub fn sector(&self, addr: u32) -> &[u8] {
        let size = self.geometry.block_size as usize;
        let start = addr as usize * size;
        &self.medium[start..start + size]
    }

    pub fn writes(&self) -> Vec<u32> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                HostOp::Write(addr) => Some(*addr),
                _ => None,
            })
            .collect()
    }

    pub fn reads(&self) -> Vec<u32> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                HostOp::Read(addr) => Some(*addr),
                _ => None,
            })
            .collect()
    }
}

impl CardHost for MockHost {
    fn power_up(&mut self, clock_div: u32, _timeout_ms: u32) -> Result<(), HostError> {
        self.ops.push(HostOp::PowerUp(clock_div));
        if self.fail_power_up {
            return Err(HostError::Timeout);
        }
        Ok(())
    }

    fn geometry(&mut self) -> Result<CardGeometry, HostError> {
        Ok(self.geometry)
    }

    fn csd(&self) -> [u32; 4] {
        self.csd
    }

    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), HostError> {
        if self.fail_bus_width {
            return Err(HostError::Fault(0x0800_0000));
        }
        self.ops.push(HostOp::BusWidth(width));
        Ok(())
    }

    fn set_clock_divisor(&mut self, clock_div: u32) -> Result<(), HostError> {
        self.ops.push(HostOp::ClockDiv(clock_div));
        Ok(())
    }

    fn read_sector(&mut self, addr: u32, buf: &mut [u8], _timeout_ms: u32) -> Result<(), HostError> {
        if self.fail_reads {
            return Err(HostError::Fault(0x02));
        }
        self.ops.push(HostOp::Read(addr));
        buf.copy_from_slice(self.sector(addr));
        Ok(())
    }

    fn write_sector(&mut self, addr: u32, buf: &[u8], _timeout_ms: u32) -> Result<(), HostError> {
        if self.fail_writes {
            return Err(HostError::Fault(0x04));
        }
        self.ops.push(HostOp::Write(addr));
        let size = self.geometry.block_size as usize;
        let start = addr as usize * size;
        self.medium[start..start + size].copy_from_slice(buf);
        Ok(())
    }

    fn card_status(&mut self) -> Result<u32, HostError> {
        let state = if self.stuck || self.busy_polls > 0 {
            self.busy_polls = self.busy_polls.saturating_sub(1);
            CardState::Programming
        } else {
            CardState::Transfer
        };
        Ok(state.to_status() | self.status_bits.bits())
    }

    fn power_down(&mut self) {
        self.ops.push(HostOp::PowerDown);
    }

    fn host_error(&self) -> u32 {
        if self.fail_reads || self.fail_writes {
            0x02
        } else {
            0
        }
    }
}

/// Clock that only moves when the driver sleeps.
#[derive(Default)]
pub struct MockClock {
    pub now: u32,
    pub delays: u32,
}

impl Clock for MockClock {
    fn now_ms(&self) -> u32 {
        self.now
    }

    fn delay_ms(&mut self, ms: u32) {
        self.now = self.now.wrapping_add(ms);
        self.delays += 1;
    }
}
