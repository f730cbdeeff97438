//! Partition storage module.

pub mod dir;
pub mod mock;
pub mod record;
pub mod traits;

pub use dir::{DirPartitions, FileWriter};
pub use mock::{MemoryPartitions, MemoryWriter};
pub use record::{BootRecord, ResetOutcome, SlotRecord};
pub use traits::{PartitionSlot, PartitionState, PartitionStore, PartitionWriter, StorageError};
