//! USB Mass Storage front-end adapter
//!
//! Sits between a USB MSC class driver and the attached [`BlockDevice`]. The
//! class driver calls in from its interrupt or task context without any
//! per-call context, so the adapter is a process-wide object: [`MSC`].
//!
//! The attached device lives behind a `spin::Mutex` and the attachment slot
//! behind a `spin::RwLock`. The front end only ever `try_read`s the slot and
//! `try_lock`s the device, so a command that arrives while the application
//! holds either fails with NOT READY instead of spinning inside the interrupt.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use lazy_static::lazy_static;
use log::{debug, info};
use spin::{Mutex, RwLock};

use crate::drivers::storage::block::{BlockDevice, StorageError, BLOCK_SIZE};
use crate::drivers::usb::scsi::{Identity, InquiryStrings, Sense};

/// A block device shared between the application and the front end.
pub type SharedBlockDevice = Mutex<dyn BlockDevice + Send>;

lazy_static! {
    /// The adapter the USB stack's MSC callbacks talk to.
    pub static ref MSC: MassStorage = MassStorage::new(Identity::default());
}

/// Counts an operation as in flight for as long as it lives.
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        BusyGuard(counter)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Mass storage front-end state: one attached device, the eject flag and
/// the in-flight operation count.
pub struct MassStorage {
    device: RwLock<Option<&'static SharedBlockDevice>>,
    ejected: AtomicBool,
    busy: AtomicUsize,
    sense: Mutex<Option<Sense>>,
    identity: Identity,
}

impl MassStorage {
    pub fn new(identity: Identity) -> Self {
        Self {
            device: RwLock::new(None),
            ejected: AtomicBool::new(false),
            busy: AtomicUsize::new(0),
            sense: Mutex::new(None),
            identity,
        }
    }

    /// Attach `device`, replacing any previous one, and clear the eject flag.
    ///
    /// The previous device is not detached first; it must be idle.
    pub fn attach(&self, device: &'static SharedBlockDevice) {
        *self.device.write() = Some(device);
        self.ejected.store(false, Ordering::Release);
        info!("msc: device attached");
    }

    pub fn detach(&self) {
        *self.device.write() = None;
        info!("msc: device detached");
    }

    /// False while `attach` or `detach` is swapping the device.
    pub fn is_attached(&self) -> bool {
        self.device.try_read().map_or(false, |slot| slot.is_some())
    }

    /// Logical eject: the device stays attached but reports not ready until
    /// the next `attach` or `load`.
    pub fn eject(&self) {
        self.ejected.store(true, Ordering::Release);
        info!("msc: medium ejected");
    }

    /// Undo `eject` without re-attaching.
    pub fn load(&self) {
        self.ejected.store(false, Ordering::Release);
    }

    pub fn is_ejected(&self) -> bool {
        self.ejected.load(Ordering::Acquire)
    }

    /// At least one read or write is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy_count() > 0
    }

    pub fn busy_count(&self) -> usize {
        self.busy.load(Ordering::Acquire)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Attached, not ejected and the device reports ready.
    pub fn is_ready(&self) -> bool {
        self.with_device(|device| Ok(device.is_ready())).unwrap_or(false)
    }

    /// `(block_count, block_size)`; zero blocks when there is nothing to serve.
    pub fn capacity(&self) -> (u32, u32) {
        self.with_device(|device| Ok((device.block_count(), device.block_size())))
            .unwrap_or((0, BLOCK_SIZE as u32))
    }

    /// Read as many whole blocks as fit in `buf`. Returns the bytes read.
    pub fn read(&self, lba: u32, buf: &mut [u8]) -> Result<usize, StorageError> {
        let _busy = BusyGuard::new(&self.busy);
        self.with_device(|device| {
            let block_size = device.block_size() as usize;
            let count = buf.len().checked_div(block_size).ok_or(StorageError::NotReady)?;
            if count == 0 {
                return Ok(0);
            }
            let len = count * block_size;
            device.read(lba, &mut buf[..len], count as u32)?;
            Ok(len)
        })
    }

    /// Write as many whole blocks as `buf` holds. Returns the bytes written.
    pub fn write(&self, lba: u32, buf: &[u8]) -> Result<usize, StorageError> {
        let _busy = BusyGuard::new(&self.busy);
        self.with_device(|device| {
            let block_size = device.block_size() as usize;
            let count = buf.len().checked_div(block_size).ok_or(StorageError::NotReady)?;
            if count == 0 {
                return Ok(0);
            }
            let len = count * block_size;
            device.write(lba, &buf[..len], count as u32)?;
            Ok(len)
        })
    }

    pub fn sync(&self) -> Result<(), StorageError> {
        let _busy = BusyGuard::new(&self.busy);
        self.with_device(|device| device.sync())
    }

    /// Run `f` on the attached device when it may serve requests.
    fn with_device<R>(
        &self,
        f: impl FnOnce(&mut (dyn BlockDevice + Send)) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        // attach/detach hold the slot from task context; never wait on it here.
        let shared = self
            .device
            .try_read()
            .and_then(|slot| *slot)
            .ok_or(StorageError::NotReady)?;
        if self.is_ejected() {
            return Err(StorageError::NotReady);
        }
        let mut device = shared.try_lock().ok_or(StorageError::NotReady)?;
        if !device.is_ready() {
            return Err(StorageError::NotReady);
        }
        f(&mut *device)
    }

    fn set_sense(&self, sense: Sense) {
        *self.sense.lock() = Some(sense);
    }

    // SCSI command handlers, one per MSC class callback.

    /// TEST UNIT READY.
    pub fn test_unit_ready(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        self.set_sense(Sense::MEDIUM_NOT_PRESENT);
        false
    }

    /// READ CAPACITY. Zero blocks with NOT READY sense when unavailable.
    pub fn read_capacity(&self) -> (u32, u16) {
        match self.capacity() {
            (0, _) => {
                self.set_sense(Sense::MEDIUM_NOT_PRESENT);
                (0, BLOCK_SIZE as u16)
            }
            (count, size) => (count, size as u16),
        }
    }

    /// START STOP UNIT. With `load_eject` set, `start == false` ejects and
    /// `start == true` loads.
    pub fn start_stop(&self, start: bool, load_eject: bool) -> bool {
        if load_eject {
            if start {
                self.load();
            } else {
                self.eject();
            }
        }
        true
    }

    /// READ(10).
    pub fn read10(&self, lba: u32, buf: &mut [u8]) -> Result<usize, Sense> {
        self.read(lba, buf).map_err(|err| {
            debug!("msc: read10 lba {} failed: {}", lba, err);
            let sense = Sense::for_read(err);
            self.set_sense(sense);
            sense
        })
    }

    /// WRITE(10).
    pub fn write10(&self, lba: u32, buf: &[u8]) -> Result<usize, Sense> {
        self.write(lba, buf).map_err(|err| {
            debug!("msc: write10 lba {} failed: {}", lba, err);
            let sense = Sense::for_write(err);
            self.set_sense(sense);
            sense
        })
    }

    /// INQUIRY identification strings.
    pub fn inquiry(&self) -> InquiryStrings {
        self.identity.inquiry()
    }

    /// Any command without a dedicated handler.
    pub fn unsupported_command(&self) -> Sense {
        self.set_sense(Sense::INVALID_COMMAND);
        Sense::INVALID_COMMAND
    }

    /// REQUEST SENSE. Returns and clears the last recorded sense.
    pub fn request_sense(&self) -> Sense {
        self.sense.lock().take().unwrap_or(Sense::NO_SENSE)
    }
}
