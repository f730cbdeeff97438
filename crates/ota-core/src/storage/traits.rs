//! Partition storage abstraction.
//!
//! Defines the `PartitionStore` trait for the dual-slot image layout the
//! bootloader owns, allowing different implementations (directory-backed,
//! in-memory, flash on the device).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::DigestError;

/// One of the two application slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionSlot {
    Ota0,
    Ota1,
}

impl PartitionSlot {
    /// The opposite slot.
    pub fn other(self) -> Self {
        match self {
            PartitionSlot::Ota0 => PartitionSlot::Ota1,
            PartitionSlot::Ota1 => PartitionSlot::Ota0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PartitionSlot::Ota0 => "ota_0",
            PartitionSlot::Ota1 => "ota_1",
        }
    }
}

impl fmt::Display for PartitionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Bootloader-visible state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    /// Never written, or erased.
    New,
    /// Committed (or booted once) and awaiting confirmation.
    PendingVerify,
    /// Confirmed bootable.
    Valid,
    /// Rolled back; the bootloader will not select it.
    Aborted,
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionState::New => write!(f, "NEW"),
            PartitionState::PendingVerify => write!(f, "PENDING_VERIFY"),
            PartitionState::Valid => write!(f, "VALID"),
            PartitionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Partition {0} is running and cannot be modified")]
    RunningPartition(PartitionSlot),

    #[error("Image corrupt: {0}")]
    ImageCorrupt(#[from] DigestError),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sequential writer into an inactive slot.
pub trait PartitionWriter: Send {
    /// Slot being written.
    fn slot(&self) -> PartitionSlot;

    /// Append image bytes.
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError>;

    /// Bytes accepted so far.
    fn bytes_written(&self) -> u64;

    /// Flush and validate the digest trailer. Does not change the boot target.
    fn finalize(self) -> Result<(), StorageError>;

    /// Give up on the write. The slot contents are unspecified afterwards,
    /// but its state and the boot target are unchanged.
    fn abort(self);
}

/// Partition metadata and image storage owned by the bootloader layer.
///
/// Implementations must refuse to write or re-target the running slot.
/// Any slot left `PendingVerify` without confirmation is rolled back by the
/// bootloader on the next reset; the core never simulates that timer.
pub trait PartitionStore: Send + Sync {
    type Writer: PartitionWriter;

    /// Slot the current image was booted from.
    fn running(&self) -> Result<PartitionSlot, StorageError>;

    /// Persisted state of `slot`.
    fn state(&self, slot: PartitionSlot) -> Result<PartitionState, StorageError>;

    /// Confirm `slot`, cancelling any pending rollback.
    fn mark_valid(&self, slot: PartitionSlot) -> Result<(), StorageError>;

    /// Erase `slot` and start writing a new image into it.
    fn begin_write(&self, slot: PartitionSlot) -> Result<Self::Writer, StorageError>;

    /// Mark `slot` `PendingVerify` and select it for the next boot.
    fn set_boot_pending(&self, slot: PartitionSlot) -> Result<(), StorageError>;

    /// Slot the next image goes into.
    fn inactive(&self) -> Result<PartitionSlot, StorageError> {
        Ok(self.running()?.other())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_other() {
        assert_eq!(PartitionSlot::Ota0.other(), PartitionSlot::Ota1);
        assert_eq!(PartitionSlot::Ota1.other(), PartitionSlot::Ota0);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", PartitionSlot::Ota1), "ota_1");
        assert_eq!(format!("{}", PartitionState::PendingVerify), "PENDING_VERIFY");
    }
}
