//! In-memory partition store for testing.

use std::sync::{Arc, Mutex};

use super::record::{BootRecord, ResetOutcome};
use super::traits::{PartitionSlot, PartitionState, PartitionStore, PartitionWriter, StorageError};
use crate::image::{DescriptorError, DigestVerifier, ImageDescriptor};
use crate::identity::{FirmwareIdentity, RunningImage};

#[derive(Debug, Default)]
struct Inner {
    record: BootRecord,
    ota_0: Vec<u8>,
    ota_1: Vec<u8>,
    /// `begin_write` calls per slot.
    erase_count: [u32; 2],
    fail_reads: bool,
    fail_mark_valid: bool,
}

impl Inner {
    fn image_mut(&mut self, slot: PartitionSlot) -> &mut Vec<u8> {
        match slot {
            PartitionSlot::Ota0 => &mut self.ota_0,
            PartitionSlot::Ota1 => &mut self.ota_1,
        }
    }

    fn image(&self, slot: PartitionSlot) -> &[u8] {
        match slot {
            PartitionSlot::Ota0 => &self.ota_0,
            PartitionSlot::Ota1 => &self.ota_1,
        }
    }
}

fn idx(slot: PartitionSlot) -> usize {
    match slot {
        PartitionSlot::Ota0 => 0,
        PartitionSlot::Ota1 => 1,
    }
}

/// In-memory partitions with fault injection.
#[derive(Clone, Default)]
pub struct MemoryPartitions {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryPartitions {
    /// Factory layout: `image` in `ota_0` (valid, running), `ota_1` empty.
    pub fn new(image: Vec<u8>) -> Self {
        let store = Self::default();
        store.inner.lock().unwrap().ota_0 = image;
        store
    }

    /// Replace the boot record wholesale.
    pub fn set_record(&self, record: BootRecord) {
        self.inner.lock().unwrap().record = record;
    }

    pub fn record(&self) -> BootRecord {
        self.inner.lock().unwrap().record.clone()
    }

    /// Make every metadata read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().unwrap().fail_reads = fail;
    }

    /// Make `mark_valid` fail.
    pub fn fail_mark_valid(&self, fail: bool) {
        self.inner.lock().unwrap().fail_mark_valid = fail;
    }

    /// Contents of `slot`.
    pub fn image(&self, slot: PartitionSlot) -> Vec<u8> {
        self.inner.lock().unwrap().image(slot).to_vec()
    }

    /// Whether `slot` has been erased for writing since creation.
    pub fn was_touched(&self, slot: PartitionSlot) -> bool {
        self.inner.lock().unwrap().erase_count[idx(slot)] > 0
    }

    /// Simulate a power cycle through the bootloader.
    pub fn reset(&self) -> ResetOutcome {
        self.inner.lock().unwrap().record.reset()
    }
}

impl RunningImage for MemoryPartitions {
    fn running_identity(&self) -> Result<FirmwareIdentity, DescriptorError> {
        let inner = self.inner.lock().unwrap();
        let running = inner.record.running;
        Ok(ImageDescriptor::from_bytes(inner.image(running))?.identity)
    }
}

impl PartitionStore for MemoryPartitions {
    type Writer = MemoryWriter;

    fn running(&self) -> Result<PartitionSlot, StorageError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_reads {
            return Err(StorageError::Metadata("injected read failure".into()));
        }
        Ok(inner.record.running)
    }

    fn state(&self, slot: PartitionSlot) -> Result<PartitionState, StorageError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_reads {
            return Err(StorageError::Metadata("injected read failure".into()));
        }
        Ok(inner.record.slot(slot).state)
    }

    fn mark_valid(&self, slot: PartitionSlot) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_mark_valid {
            return Err(StorageError::Metadata("injected write failure".into()));
        }
        inner.record.mark_valid(slot);
        Ok(())
    }

    fn begin_write(&self, slot: PartitionSlot) -> Result<MemoryWriter, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record.erase(slot)?;
        inner.erase_count[idx(slot)] += 1;
        inner.image_mut(slot).clear();
        Ok(MemoryWriter {
            inner: Arc::clone(&self.inner),
            slot,
            verifier: DigestVerifier::new(),
        })
    }

    fn set_boot_pending(&self, slot: PartitionSlot) -> Result<(), StorageError> {
        self.inner.lock().unwrap().record.set_boot_pending(slot)
    }
}

/// Writer appending straight into the slot buffer.
pub struct MemoryWriter {
    inner: Arc<Mutex<Inner>>,
    slot: PartitionSlot,
    verifier: DigestVerifier,
}

impl PartitionWriter for MemoryWriter {
    fn slot(&self) -> PartitionSlot {
        self.slot
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.inner
            .lock()
            .unwrap()
            .image_mut(self.slot)
            .extend_from_slice(data);
        self.verifier.update(data);
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.verifier.bytes_seen()
    }

    fn finalize(self) -> Result<(), StorageError> {
        self.verifier.finish()?;
        Ok(())
    }

    fn abort(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::pack_image;

    fn image(version: &str) -> Vec<u8> {
        let d = ImageDescriptor::new(FirmwareIdentity::new("node", version, "t"));
        pack_image(&d, b"body").unwrap()
    }

    #[test]
    fn test_running_identity_from_slot() {
        let store = MemoryPartitions::new(image("1.0.0"));
        assert_eq!(store.running_identity().unwrap().version, "1.0.0");
    }

    #[test]
    fn test_write_into_running_refused() {
        let store = MemoryPartitions::new(image("1.0.0"));
        assert!(matches!(
            store.begin_write(PartitionSlot::Ota0),
            Err(StorageError::RunningPartition(_))
        ));
        assert!(!store.was_touched(PartitionSlot::Ota0));
    }

    #[test]
    fn test_write_finalize_commit_reset() {
        let store = MemoryPartitions::new(image("1.0.0"));
        let slot = store.inactive().unwrap();
        let mut w = store.begin_write(slot).unwrap();
        for c in image("2.0.0").chunks(16) {
            w.write(c).unwrap();
        }
        w.finalize().unwrap();
        store.set_boot_pending(slot).unwrap();

        store.reset();
        assert_eq!(store.running().unwrap(), PartitionSlot::Ota1);
        assert_eq!(store.running_identity().unwrap().version, "2.0.0");
        assert_eq!(store.state(slot).unwrap(), PartitionState::PendingVerify);
    }

    #[test]
    fn test_corrupt_finalize() {
        let store = MemoryPartitions::new(image("1.0.0"));
        let mut bad = image("2.0.0");
        bad[ImageDescriptor::SIZE] ^= 0x55;
        let mut w = store.begin_write(PartitionSlot::Ota1).unwrap();
        w.write(&bad).unwrap();
        assert!(matches!(w.finalize(), Err(StorageError::ImageCorrupt(_))));
        assert_eq!(store.image(PartitionSlot::Ota0), image("1.0.0"));
        assert_eq!(store.record().boot, PartitionSlot::Ota0);
    }
}
