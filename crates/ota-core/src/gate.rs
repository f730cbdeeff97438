//! Update gate - single-flight guard over update sessions.
//!
//! At most one fetch/apply sequence runs at a time. Admission is a single
//! compare-exchange, so two notifications racing through the dispatcher
//! produce exactly one session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::error::RejectReason;
use crate::session::{UpdateOffer, UpdateSession};

/// Exclusive lock over update sessions. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct UpdateGate {
    held: Arc<AtomicBool>,
}

impl UpdateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `offer` if no session is running.
    pub fn try_admit(
        &self,
        offer: UpdateOffer,
    ) -> Result<(UpdateSession, GateToken), RejectReason> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(version = %offer.target_version, "Gate held, rejecting offer");
            return Err(RejectReason::UpdateAlreadyInProgress);
        }
        debug!(version = %offer.target_version, "Gate acquired");
        Ok((
            UpdateSession::new(offer),
            GateToken {
                gate: self.clone(),
                armed: true,
            },
        ))
    }

    /// Return the gate to free. Idempotent.
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of admission. Releases the gate when released or dropped, unless
/// retained across a restart.
#[derive(Debug)]
pub struct GateToken {
    gate: UpdateGate,
    armed: bool,
}

impl GateToken {
    /// Release the gate for the next session.
    pub fn release(mut self) {
        self.armed = false;
        self.gate.release();
        debug!("Gate released");
    }

    /// Keep the gate held; the device is restarting and in-memory state
    /// goes with it.
    pub fn retain(mut self) {
        self.armed = false;
    }
}

impl Drop for GateToken {
    fn drop(&mut self) {
        if self.armed {
            warn!("Gate token dropped without explicit release");
            self.gate.release();
        }
    }
}
