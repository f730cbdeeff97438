//! Boot selection record shared by the reference stores.
//!
//! Models the metadata a dual-slot bootloader keeps, and the decision it
//! makes on every reset.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::traits::{PartitionSlot, PartitionState, StorageError};

/// Per-slot metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub state: PartitionState,
    /// Boots from this slot since it was last committed or confirmed.
    pub boot_attempts: u32,
}

impl SlotRecord {
    fn new(state: PartitionState) -> Self {
        Self {
            state,
            boot_attempts: 0,
        }
    }
}

/// What the bootloader did on a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Booted the same slot again.
    Unchanged(PartitionSlot),
    /// Booted the newly selected slot for the first time.
    Switched { from: PartitionSlot, to: PartitionSlot },
    /// The running slot was never confirmed; reverted to the other one.
    RolledBack { from: PartitionSlot, to: PartitionSlot },
}

/// Whole boot record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootRecord {
    pub running: PartitionSlot,
    pub boot: PartitionSlot,
    pub ota_0: SlotRecord,
    pub ota_1: SlotRecord,
}

impl Default for BootRecord {
    /// Factory layout: image in `ota_0`, `ota_1` empty.
    fn default() -> Self {
        Self {
            running: PartitionSlot::Ota0,
            boot: PartitionSlot::Ota0,
            ota_0: SlotRecord::new(PartitionState::Valid),
            ota_1: SlotRecord::new(PartitionState::New),
        }
    }
}

impl BootRecord {
    pub fn slot(&self, slot: PartitionSlot) -> &SlotRecord {
        match slot {
            PartitionSlot::Ota0 => &self.ota_0,
            PartitionSlot::Ota1 => &self.ota_1,
        }
    }

    pub fn slot_mut(&mut self, slot: PartitionSlot) -> &mut SlotRecord {
        match slot {
            PartitionSlot::Ota0 => &mut self.ota_0,
            PartitionSlot::Ota1 => &mut self.ota_1,
        }
    }

    pub fn mark_valid(&mut self, slot: PartitionSlot) {
        let rec = self.slot_mut(slot);
        rec.state = PartitionState::Valid;
        rec.boot_attempts = 0;
    }

    /// Erasing a slot resets it to `New`; the running slot is off limits.
    pub fn erase(&mut self, slot: PartitionSlot) -> Result<(), StorageError> {
        if slot == self.running {
            return Err(StorageError::RunningPartition(slot));
        }
        if self.boot == slot {
            self.boot = self.running;
        }
        *self.slot_mut(slot) = SlotRecord::new(PartitionState::New);
        Ok(())
    }

    pub fn set_boot_pending(&mut self, slot: PartitionSlot) -> Result<(), StorageError> {
        if slot == self.running {
            return Err(StorageError::RunningPartition(slot));
        }
        *self.slot_mut(slot) = SlotRecord::new(PartitionState::PendingVerify);
        self.boot = slot;
        Ok(())
    }

    /// Apply the bootloader's slot selection for one reset.
    pub fn reset(&mut self) -> ResetOutcome {
        let current = self.running;
        let cur = *self.slot(current);

        if cur.state == PartitionState::PendingVerify && cur.boot_attempts > 0 {
            let to = current.other();
            warn!(from = %current, to = %to, "Unconfirmed image, rolling back");
            self.slot_mut(current).state = PartitionState::Aborted;
            self.running = to;
            self.boot = to;
            return ResetOutcome::RolledBack { from: current, to };
        }

        let target = self.boot;
        if target != current && self.slot(target).state == PartitionState::PendingVerify {
            info!(from = %current, to = %target, "Booting newly committed image");
            self.running = target;
            self.slot_mut(target).boot_attempts += 1;
            return ResetOutcome::Switched {
                from: current,
                to: target,
            };
        }

        self.boot = current;
        if cur.state == PartitionState::PendingVerify {
            self.slot_mut(current).boot_attempts += 1;
        }
        ResetOutcome::Unchanged(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_then_reset_switches() {
        let mut r = BootRecord::default();
        r.set_boot_pending(PartitionSlot::Ota1).unwrap();
        assert_eq!(
            r.reset(),
            ResetOutcome::Switched {
                from: PartitionSlot::Ota0,
                to: PartitionSlot::Ota1
            }
        );
        assert_eq!(r.running, PartitionSlot::Ota1);
        assert_eq!(r.ota_1.state, PartitionState::PendingVerify);
        assert_eq!(r.ota_1.boot_attempts, 1);
    }

    #[test]
    fn test_unconfirmed_second_reset_rolls_back() {
        let mut r = BootRecord::default();
        r.set_boot_pending(PartitionSlot::Ota1).unwrap();
        r.reset();
        assert_eq!(
            r.reset(),
            ResetOutcome::RolledBack {
                from: PartitionSlot::Ota1,
                to: PartitionSlot::Ota0
            }
        );
        assert_eq!(r.running, PartitionSlot::Ota0);
        assert_eq!(r.ota_1.state, PartitionState::Aborted);
        assert_eq!(r.ota_0.state, PartitionState::Valid);
    }

    #[test]
    fn test_confirmed_image_survives_reset() {
        let mut r = BootRecord::default();
        r.set_boot_pending(PartitionSlot::Ota1).unwrap();
        r.reset();
        r.mark_valid(PartitionSlot::Ota1);
        assert_eq!(r.reset(), ResetOutcome::Unchanged(PartitionSlot::Ota1));
        assert_eq!(r.ota_1.state, PartitionState::Valid);
    }

    #[test]
    fn test_running_slot_protected() {
        let mut r = BootRecord::default();
        assert!(matches!(
            r.set_boot_pending(PartitionSlot::Ota0),
            Err(StorageError::RunningPartition(PartitionSlot::Ota0))
        ));
        assert!(r.erase(PartitionSlot::Ota0).is_err());
    }

    #[test]
    fn test_erase_deselects_pending_boot() {
        let mut r = BootRecord::default();
        r.set_boot_pending(PartitionSlot::Ota1).unwrap();
        r.erase(PartitionSlot::Ota1).unwrap();
        assert_eq!(r.boot, PartitionSlot::Ota0);
        assert_eq!(r.ota_1.state, PartitionState::New);
        assert_eq!(r.reset(), ResetOutcome::Unchanged(PartitionSlot::Ota0));
    }

    #[test]
    fn test_record_toml_roundtrip() {
        let mut r = BootRecord::default();
        r.set_boot_pending(PartitionSlot::Ota1).unwrap();
        let text = toml::to_string_pretty(&r).unwrap();
        assert!(text.contains("pending_verify"));
        let back: BootRecord = toml::from_str(&text).unwrap();
        assert_eq!(back, r);
    }
}
