//! Directory-backed partition store for host-side runs.
//!
//! Layout:
//!
//! ```text
//! <dir>/ota_0.bin      slot images
//! <dir>/ota_1.bin
//! <dir>/otadata.toml   boot record
//! ```
//!
//! The boot record is replaced atomically (write to a temp file, rename) so a
//! crash mid-update leaves either the old or the new record, never a torn one.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use super::record::{BootRecord, ResetOutcome};
use super::traits::{PartitionSlot, PartitionState, PartitionStore, PartitionWriter, StorageError};
use crate::identity::{FirmwareIdentity, RunningImage};
use crate::image::{DescriptorError, DigestVerifier, ImageDescriptor};

const RECORD_FILE: &str = "otadata.toml";

/// Partition store keeping slots and metadata in one directory.
pub struct DirPartitions {
    dir: PathBuf,
    /// Serializes read-modify-write of the boot record.
    lock: Mutex<()>,
}

impl DirPartitions {
    /// Open `dir`, creating a factory layout if no record exists yet.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let store = Self {
            dir,
            lock: Mutex::new(()),
        };
        if !store.record_path().exists() {
            info!(dir = %store.dir.display(), "Initializing partition table");
            store.save_record(&BootRecord::default())?;
        }
        Ok(store)
    }

    /// Write a factory image into the running slot, bypassing the update path.
    pub fn install_factory(&self, image: &[u8]) -> Result<(), StorageError> {
        let _guard = self.guard()?;
        let record = BootRecord::default();
        fs::write(self.slot_path(record.running), image)?;
        match fs::remove_file(self.slot_path(record.running.other())) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        self.save_record(&record)
    }

    /// Current boot record.
    pub fn record(&self) -> Result<BootRecord, StorageError> {
        let _guard = self.guard()?;
        self.load_record()
    }

    /// Simulate a power cycle through the bootloader.
    pub fn simulate_reset(&self) -> Result<ResetOutcome, StorageError> {
        let _guard = self.guard()?;
        let mut record = self.load_record()?;
        let outcome = record.reset();
        self.save_record(&record)?;
        Ok(outcome)
    }

    /// Identity embedded in `slot`, if it holds a parseable image.
    pub fn slot_identity(&self, slot: PartitionSlot) -> Result<FirmwareIdentity, DescriptorError> {
        let mut head = vec![0u8; ImageDescriptor::SIZE];
        let mut file = File::open(self.slot_path(slot))?;
        let n = read_full(&mut file, &mut head)?;
        Ok(ImageDescriptor::from_bytes(&head[..n])?.identity)
    }

    pub fn slot_path(&self, slot: PartitionSlot) -> PathBuf {
        self.dir.join(format!("{}.bin", slot.label()))
    }

    fn record_path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, StorageError> {
        self.lock
            .lock()
            .map_err(|_| StorageError::Metadata("boot record lock poisoned".into()))
    }

    fn load_record(&self) -> Result<BootRecord, StorageError> {
        let text = fs::read_to_string(self.record_path())?;
        toml::from_str(&text).map_err(|e| StorageError::Metadata(e.to_string()))
    }

    fn save_record(&self, record: &BootRecord) -> Result<(), StorageError> {
        let text =
            toml::to_string_pretty(record).map_err(|e| StorageError::Metadata(e.to_string()))?;
        let tmp = self.record_path().with_extension("toml.tmp");
        {
            let mut f = File::create(&tmp)?;
            f.write_all(text.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, self.record_path())?;
        debug!(running = %record.running, boot = %record.boot, "Saved boot record");
        Ok(())
    }

    fn update_record(
        &self,
        f: impl FnOnce(&mut BootRecord) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let _guard = self.guard()?;
        let mut record = self.load_record()?;
        f(&mut record)?;
        self.save_record(&record)
    }
}

fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl RunningImage for DirPartitions {
    fn running_identity(&self) -> Result<FirmwareIdentity, DescriptorError> {
        let running = self
            .record()
            .map_err(|e| DescriptorError::Io(std::io::Error::other(e.to_string())))?
            .running;
        self.slot_identity(running)
    }
}

impl PartitionStore for DirPartitions {
    type Writer = FileWriter;

    fn running(&self) -> Result<PartitionSlot, StorageError> {
        Ok(self.record()?.running)
    }

    fn state(&self, slot: PartitionSlot) -> Result<PartitionState, StorageError> {
        Ok(self.record()?.slot(slot).state)
    }

    fn mark_valid(&self, slot: PartitionSlot) -> Result<(), StorageError> {
        self.update_record(|r| {
            r.mark_valid(slot);
            Ok(())
        })
    }

    fn begin_write(&self, slot: PartitionSlot) -> Result<FileWriter, StorageError> {
        self.update_record(|r| r.erase(slot))?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.slot_path(slot))?;
        info!(slot = %slot, "Erased partition for writing");
        Ok(FileWriter {
            file,
            slot,
            verifier: DigestVerifier::new(),
        })
    }

    fn set_boot_pending(&self, slot: PartitionSlot) -> Result<(), StorageError> {
        self.update_record(|r| r.set_boot_pending(slot))
    }
}

/// Writer streaming into a slot file.
pub struct FileWriter {
    file: File,
    slot: PartitionSlot,
    verifier: DigestVerifier,
}

impl PartitionWriter for FileWriter {
    fn slot(&self) -> PartitionSlot {
        self.slot
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.file.write_all(data)?;
        self.verifier.update(data);
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.verifier.bytes_seen()
    }

    fn finalize(mut self) -> Result<(), StorageError> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.verifier.finish()?;
        Ok(())
    }

    fn abort(self) {
        debug!(slot = %self.slot, "Write aborted");
    }
}
