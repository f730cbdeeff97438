//! Host stand-ins for device capabilities.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ota_core::{DirPartitions, Restart};
use tracing::{error, info};

/// Restart that runs the bootloader's slot selection on the partition
/// directory instead of resetting the machine.
pub struct HostRestart {
    store: Arc<DirPartitions>,
    requested: AtomicBool,
}

impl HostRestart {
    pub fn new(store: Arc<DirPartitions>) -> Self {
        Self {
            store,
            requested: AtomicBool::new(false),
        }
    }

    pub fn was_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl Restart for HostRestart {
    fn restart(&self) {
        self.requested.store(true, Ordering::SeqCst);
        info!("Restarting...");
        match self.store.simulate_reset() {
            Ok(outcome) => info!(outcome = ?outcome, "Bootloader selected slot"),
            Err(e) => error!(error = %e, "Simulated reset failed"),
        }
    }
}
