//! Boot reconciliation.
//!
//! Runs once per boot, before anything else touches the network. A running
//! partition still marked `PendingVerify` means this is the first boot of a
//! new image; marking it `Valid` tells the bootloader not to roll back.

use tracing::{error, info, warn};

use crate::events::{BootOutcome, OtaEvent, OtaObserver};
use crate::storage::{PartitionState, PartitionStore};

/// Confirm a freshly updated image, or do nothing on a normal boot.
///
/// Metadata failures are logged and treated as a normal boot; reconciliation
/// never blocks startup.
pub fn reconcile_boot_state<P: PartitionStore, O: OtaObserver + ?Sized>(
    store: &P,
    observer: &O,
) -> BootOutcome {
    let slot = match store.running() {
        Ok(slot) => slot,
        Err(e) => {
            error!(error = %e, "Failed to get running partition");
            observer.on_event(&OtaEvent::BootReconciled {
                slot: None,
                state: None,
                outcome: BootOutcome::NormalBoot,
            });
            return BootOutcome::NormalBoot;
        }
    };

    let state = match store.state(slot) {
        Ok(state) => state,
        Err(e) => {
            warn!(slot = %slot, error = %e, "Failed to get partition state");
            observer.on_event(&OtaEvent::BootReconciled {
                slot: Some(slot),
                state: None,
                outcome: BootOutcome::NormalBoot,
            });
            return BootOutcome::NormalBoot;
        }
    };
    info!(slot = %slot, state = %state, "Running partition");

    let outcome = if state == PartitionState::PendingVerify {
        info!("First boot after OTA update, marking app as valid");
        match store.mark_valid(slot) {
            Ok(()) => {
                info!(slot = %slot, "App marked as valid, rollback cancelled");
                BootOutcome::ConfirmedUpdate
            }
            Err(e) => {
                // Left pending: the bootloader rolls back on the next reset.
                error!(slot = %slot, error = %e, "Failed to mark app as valid");
                BootOutcome::NormalBoot
            }
        }
    } else {
        BootOutcome::NormalBoot
    };

    observer.on_event(&OtaEvent::BootReconciled {
        slot: Some(slot),
        state: Some(state),
        outcome,
    });
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;
    use crate::identity::FirmwareIdentity;
    use crate::image::{ImageDescriptor, pack_image};
    use crate::storage::{MemoryPartitions, PartitionSlot, PartitionWriter, ResetOutcome};

    fn image(version: &str) -> Vec<u8> {
        pack_image(
            &ImageDescriptor::new(FirmwareIdentity::new("node", version, "t")),
            b"body",
        )
        .unwrap()
    }

    /// Store that has just rebooted into a pending `ota_1`.
    fn freshly_updated() -> MemoryPartitions {
        let store = MemoryPartitions::new(image("1.0.0"));
        let mut writer = store.begin_write(PartitionSlot::Ota1).unwrap();
        writer.write(&image("2.0.0")).unwrap();
        writer.finalize().unwrap();
        store.set_boot_pending(PartitionSlot::Ota1).unwrap();
        assert_eq!(
            store.reset(),
            ResetOutcome::Switched {
                from: PartitionSlot::Ota0,
                to: PartitionSlot::Ota1
            }
        );
        store
    }

    #[test]
    fn test_normal_boot() {
        let store = MemoryPartitions::new(image("1.0.0"));
        let observer = RecordingObserver::new();
        assert_eq!(
            reconcile_boot_state(&store, &observer),
            BootOutcome::NormalBoot
        );
        assert_eq!(
            store.state(PartitionSlot::Ota0).unwrap(),
            PartitionState::Valid
        );
        assert_eq!(
            observer.events(),
            vec![OtaEvent::BootReconciled {
                slot: Some(PartitionSlot::Ota0),
                state: Some(PartitionState::Valid),
                outcome: BootOutcome::NormalBoot,
            }]
        );
    }

    #[test]
    fn test_first_boot_confirms_update() {
        let store = freshly_updated();
        let observer = RecordingObserver::new();
        assert_eq!(
            reconcile_boot_state(&store, &observer),
            BootOutcome::ConfirmedUpdate
        );
        assert_eq!(
            store.state(PartitionSlot::Ota1).unwrap(),
            PartitionState::Valid
        );

        // Confirmed images survive further resets.
        assert_eq!(store.reset(), ResetOutcome::Unchanged(PartitionSlot::Ota1));
        assert_eq!(
            reconcile_boot_state(&store, &observer),
            BootOutcome::NormalBoot
        );
    }

    #[test]
    fn test_unconfirmed_update_rolls_back() {
        let store = freshly_updated();
        assert!(matches!(store.reset(), ResetOutcome::RolledBack { .. }));
        assert_eq!(store.running().unwrap(), PartitionSlot::Ota0);
        assert_eq!(
            reconcile_boot_state(&store, &RecordingObserver::new()),
            BootOutcome::NormalBoot
        );
    }

    #[test]
    fn test_read_failure_fails_open() {
        let store = MemoryPartitions::new(image("1.0.0"));
        store.fail_reads(true);
        let observer = RecordingObserver::new();
        assert_eq!(
            reconcile_boot_state(&store, &observer),
            BootOutcome::NormalBoot
        );
        assert_eq!(
            observer.events(),
            vec![OtaEvent::BootReconciled {
                slot: None,
                state: None,
                outcome: BootOutcome::NormalBoot,
            }]
        );
    }

    #[test]
    fn test_mark_valid_failure_leaves_pending() {
        let store = freshly_updated();
        store.fail_mark_valid(true);
        assert_eq!(
            reconcile_boot_state(&store, &RecordingObserver::new()),
            BootOutcome::NormalBoot
        );
        assert_eq!(
            store.state(PartitionSlot::Ota1).unwrap(),
            PartitionState::PendingVerify
        );
    }
}
