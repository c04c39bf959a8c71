//! SD/eMMC card driver
//!
//! Brings a card up through the platform's [`CardHost`] and exposes it as a
//! [`BlockDevice`] with 512-byte blocks. Cards whose native sector is larger
//! are served through the sector translation layer.

use log::{debug, error, info, warn};

use crate::config::SdmmcConfig;
use crate::drivers::storage::block::{request_len, BlockDevice, StorageError, BLOCK_SIZE};
use crate::drivers::storage::card::{BusWidth, CardHost, CardState, CardStatus, Csd};
use crate::drivers::storage::stl::{SectorCache, SectorIo};
use crate::platform::{Clock, PlatformHooks};

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdmmcState {
    NotInitialized,
    Ready,
    /// Init sequence in progress.
    Busy,
    /// Init failed. Only a new `init` leaves this state.
    Error,
}

/// Card information populated by a successful `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardInfo {
    /// Logical 512-byte blocks.
    pub block_count: u32,
    pub block_size: u32,
    pub capacity_bytes: u64,
    pub card_type: u32,
    pub card_version: u32,
    pub is_ready: bool,
}

impl CardInfo {
    const EMPTY: CardInfo = CardInfo {
        block_count: 0,
        block_size: BLOCK_SIZE as u32,
        capacity_bytes: 0,
        card_type: 0,
        card_version: 0,
        is_ready: false,
    };
}

impl Default for CardInfo {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Read-only snapshot for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Diagnostics {
    pub host_state: u32,
    pub host_error: u32,
    /// Controller status register.
    pub status_register: u32,
    /// Last R1 card status seen while polling.
    pub card_status: u32,
    pub last_error: Option<StorageError>,
}

/// The hardware half of the driver.
struct CardLink<H, C> {
    host: H,
    clock: C,
    rw_timeout_ms: u32,
    last_status: u32,
}

impl<H: CardHost, C: Clock> CardLink<H, C> {
    fn card_state(&mut self) -> Option<CardState> {
        let status = self.host.card_status().ok()?;
        self.last_status = status;
        CardState::from_status(status)
    }

    fn poll_ready(&mut self) -> nb::Result<(), StorageError> {
        let status = self
            .host
            .card_status()
            .map_err(|err| nb::Error::Other(StorageError::from(err)))?;
        self.last_status = status;
        if CardStatus::from_bits_truncate(status).has_error() {
            return Err(nb::Error::Other(StorageError::HardwareFault));
        }
        match CardState::from_status(status) {
            Some(CardState::Transfer) => Ok(()),
            _ => Err(nb::Error::WouldBlock),
        }
    }

    /// Poll until the card is back in TRAN.
    fn wait_ready(&mut self, timeout_ms: u32) -> Result<(), StorageError> {
        let start = self.clock.now_ms();
        while self.clock.now_ms().wrapping_sub(start) < timeout_ms {
            match self.poll_ready() {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) => self.clock.delay_ms(1),
                Err(nb::Error::Other(err)) => return Err(err),
            }
        }
        debug!("sdmmc: card not ready after {} ms, status {:#010x}", timeout_ms, self.last_status);
        Err(StorageError::HardwareTimeout)
    }

    /// 1:1 block reads through the bounce buffer.
    fn read_blocks(&mut self, bounce: &mut [u8; BLOCK_SIZE], lba: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        for (i, block) in buf.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            self.read_sector(lba + i as u32, &mut bounce[..])?;
            block.copy_from_slice(&bounce[..]);
        }
        Ok(())
    }

    fn write_blocks(&mut self, bounce: &mut [u8; BLOCK_SIZE], lba: u32, buf: &[u8]) -> Result<(), StorageError> {
        for (i, block) in buf.chunks_exact(BLOCK_SIZE).enumerate() {
            bounce.copy_from_slice(block);
            self.write_sector(lba + i as u32, &bounce[..])?;
        }
        Ok(())
    }
}

impl<H: CardHost, C: Clock> SectorIo for CardLink<H, C> {
    fn read_sector(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        self.host.read_sector(addr, buf, self.rw_timeout_ms)?;
        self.wait_ready(self.rw_timeout_ms)
    }

    fn write_sector(&mut self, addr: u32, buf: &[u8]) -> Result<(), StorageError> {
        self.host.write_sector(addr, buf, self.rw_timeout_ms)?;
        self.wait_ready(self.rw_timeout_ms)
    }
}

/// SD card block device.
///
/// Controller, clock and buffers are owned privately; consumers only see the
/// [`BlockDevice`] contract.
pub struct SdmmcBlockDevice<H: CardHost, C: Clock> {
    link: CardLink<H, C>,
    hooks: PlatformHooks,
    config: SdmmcConfig,
    state: SdmmcState,
    card_info: CardInfo,
    phys_block_size: usize,
    bounce: [u8; BLOCK_SIZE],
    cache: SectorCache,
    last_error: Option<StorageError>,
}

impl<H: CardHost, C: Clock> SdmmcBlockDevice<H, C> {
    pub fn new(host: H, clock: C) -> Self {
        Self::with_hooks(host, clock, PlatformHooks::default())
    }

    pub fn with_hooks(host: H, clock: C, hooks: PlatformHooks) -> Self {
        let config = SdmmcConfig::default();
        Self {
            link: CardLink { host, clock, rw_timeout_ms: config.rw_timeout_ms, last_status: 0 },
            hooks,
            config,
            state: SdmmcState::NotInitialized,
            card_info: CardInfo::EMPTY,
            phys_block_size: BLOCK_SIZE,
            bounce: [0; BLOCK_SIZE],
            cache: SectorCache::new(),
            last_error: None,
        }
    }

    /// Identify the card and bring the bus to full speed.
    ///
    /// Returns immediately when already ready.
    pub fn init(&mut self, config: SdmmcConfig) -> Result<(), StorageError> {
        if self.state == SdmmcState::Ready {
            return Ok(());
        }
        if let Err(err) = config.validate() {
            return Err(self.fail_init(err));
        }

        self.config = config;
        self.link.rw_timeout_ms = config.rw_timeout_ms;
        self.cache.invalidate();
        self.phys_block_size = BLOCK_SIZE;
        self.card_info = CardInfo::EMPTY;
        self.state = SdmmcState::Busy;

        (self.hooks.init_pins)(&self.config);

        match self.bring_up() {
            Ok(info) => {
                info!(
                    "sdmmc: card ready, {} blocks ({} MiB), {}-byte sectors",
                    info.block_count,
                    info.capacity_bytes / (1024 * 1024),
                    self.phys_block_size
                );
                self.card_info = info;
                self.state = SdmmcState::Ready;
                Ok(())
            }
            Err(err) => {
                self.cache.invalidate();
                self.link.host.power_down();
                (self.hooks.deinit_pins)(&self.config);
                Err(self.fail_init(err))
            }
        }
    }

    fn fail_init(&mut self, err: StorageError) -> StorageError {
        error!("sdmmc: init failed: {}", err);
        self.state = SdmmcState::Error;
        self.card_info = CardInfo::EMPTY;
        self.last_error = Some(err);
        err
    }

    fn bring_up(&mut self) -> Result<CardInfo, StorageError> {
        let config = self.config;
        self.link.host.power_up(config.init_clock_div, config.init_timeout_ms)?;

        let mut geometry = self.link.host.geometry()?;
        if geometry.block_count == 0 {
            if let Some(csd) = Csd::from_words(self.link.host.csd()).geometry() {
                debug!("sdmmc: geometry from CSD, {} x {}", csd.block_count, csd.block_size);
                geometry.block_count = csd.block_count;
                geometry.block_size = csd.block_size;
            }
        }

        let phys_block_size = match geometry.block_size {
            0 => BLOCK_SIZE,
            size => size as usize,
        };
        if self.cache.set_sector_size(phys_block_size).is_err() {
            error!("sdmmc: unsupported sector size {}", phys_block_size);
            return Err(StorageError::HardwareFault);
        }
        let ratio = (phys_block_size / BLOCK_SIZE) as u32;
        let block_count = geometry
            .block_count
            .checked_mul(ratio)
            .ok_or(StorageError::HardwareFault)?;

        self.configure_bus()?;
        self.link.wait_ready(config.ready_timeout_ms)?;

        if block_count == 0 {
            return Err(StorageError::NotReady);
        }

        self.phys_block_size = phys_block_size;
        Ok(CardInfo {
            block_count,
            block_size: BLOCK_SIZE as u32,
            capacity_bytes: block_count as u64 * BLOCK_SIZE as u64,
            card_type: geometry.card_type,
            card_version: geometry.card_version,
            is_ready: true,
        })
    }

    /// Widen the bus, then raise the clock. Bus width negotiation needs the
    /// slow clock, so a rejected 4-bit switch keeps the card at init speed.
    fn configure_bus(&mut self) -> Result<(), StorageError> {
        let host = &mut self.link.host;
        if self.config.bus_width == BusWidth::Four {
            if let Err(err) = host.set_bus_width(BusWidth::Four) {
                warn!("sdmmc: 4-bit bus rejected ({:?}), staying on 1-bit", err);
                return Ok(());
            }
        }
        host.set_clock_divisor(self.config.normal_clock_div)?;
        Ok(())
    }

    /// Flush the cache and release the bus. No-op when not initialized.
    pub fn deinit(&mut self) {
        match self.state {
            SdmmcState::NotInitialized => return,
            // Failed init already released the bus.
            SdmmcState::Error => {
                self.state = SdmmcState::NotInitialized;
                return;
            }
            _ => {}
        }
        if let Err(err) = self.cache.flush(&mut self.link) {
            warn!("sdmmc: dropping unflushed sector on deinit: {}", err);
        }
        self.cache.invalidate();
        self.link.host.power_down();
        (self.hooks.deinit_pins)(&self.config);

        self.state = SdmmcState::NotInitialized;
        self.card_info = CardInfo::EMPTY;
        self.phys_block_size = BLOCK_SIZE;
        info!("sdmmc: deinitialized");
    }

    /// Card is initialized and currently in TRAN.
    pub fn is_card_inserted(&mut self) -> bool {
        self.state == SdmmcState::Ready && self.link.card_state() == Some(CardState::Transfer)
    }

    pub fn card_info(&self) -> CardInfo {
        self.card_info
    }

    pub fn state(&self) -> SdmmcState {
        self.state
    }

    pub fn config(&self) -> &SdmmcConfig {
        &self.config
    }

    /// Native sector size of the card; 512 means no translation.
    pub fn physical_block_size(&self) -> usize {
        self.phys_block_size
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let host = &self.link.host;
        Diagnostics {
            host_state: host.host_state(),
            host_error: host.host_error(),
            status_register: host.status_register(),
            card_status: self.link.last_status,
            last_error: self.last_error,
        }
    }

    fn check_request(&self, lba: u32, count: u32, buf_len: usize) -> Result<usize, StorageError> {
        match self.state {
            SdmmcState::Ready if self.card_info.is_ready => {}
            SdmmcState::NotInitialized => return Err(StorageError::NotInitialized),
            _ => return Err(StorageError::NotReady),
        }
        request_len(self.card_info.block_count, lba, count, buf_len)
    }

    fn read_inner(&mut self, lba: u32, buf: &mut [u8], count: u32) -> Result<(), StorageError> {
        let len = self.check_request(lba, count, buf.len())?;
        if self.phys_block_size == BLOCK_SIZE {
            self.link.read_blocks(&mut self.bounce, lba, &mut buf[..len])
        } else {
            self.cache.read(&mut self.link, lba, &mut buf[..len])
        }
    }

    fn write_inner(&mut self, lba: u32, buf: &[u8], count: u32) -> Result<(), StorageError> {
        let len = self.check_request(lba, count, buf.len())?;
        if self.phys_block_size == BLOCK_SIZE {
            self.link.write_blocks(&mut self.bounce, lba, &buf[..len])
        } else {
            self.cache.write(&mut self.link, lba, &buf[..len])
        }
    }

    fn record(&mut self, result: Result<(), StorageError>) -> Result<(), StorageError> {
        if let Err(err) = result {
            debug!("sdmmc: {}", err);
            self.last_error = Some(err);
        }
        result
    }
}

impl<H: CardHost, C: Clock> BlockDevice for SdmmcBlockDevice<H, C> {
    fn is_ready(&self) -> bool {
        self.state == SdmmcState::Ready && self.card_info.is_ready
    }

    fn block_count(&self) -> u32 {
        if self.is_ready() {
            self.card_info.block_count
        } else {
            0
        }
    }

    fn read(&mut self, lba: u32, buf: &mut [u8], count: u32) -> Result<(), StorageError> {
        let result = self.read_inner(lba, buf, count);
        self.record(result)
    }

    fn write(&mut self, lba: u32, buf: &[u8], count: u32) -> Result<(), StorageError> {
        let result = self.write_inner(lba, buf, count);
        self.record(result)
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        let result = self.cache.flush(&mut self.link);
        self.record(result)
    }
}

impl<H: CardHost, C: Clock> Drop for SdmmcBlockDevice<H, C> {
    fn drop(&mut self) {
        self.deinit();
    }
}
