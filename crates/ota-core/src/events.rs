//! Event system for UI and telemetry decoupling.
//!
//! Update failures have no interactive surface on the device; they are only
//! observable through these events. The default observer forwards them to
//! `tracing`.

use std::fmt;
use std::sync::Mutex;

use crate::session::SessionPhase;
use crate::storage::{PartitionSlot, PartitionState};

/// Result of boot reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// Steady state, nothing to confirm.
    NormalBoot,
    /// First boot after an update; the image is now confirmed.
    ConfirmedUpdate,
}

impl fmt::Display for BootOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootOutcome::NormalBoot => write!(f, "Normal Boot"),
            BootOutcome::ConfirmedUpdate => write!(f, "Confirmed Update"),
        }
    }
}

/// Events emitted by the agent and its sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaEvent {
    /// Boot reconciliation finished.
    BootReconciled {
        slot: Option<PartitionSlot>,
        state: Option<PartitionState>,
        outcome: BootOutcome,
    },
    /// A notification was turned away before a session existed.
    NotificationRejected { reason: String },
    /// A session was admitted.
    SessionAdmitted { version: String, locator: String },
    /// Session phase changed.
    PhaseChanged { from: SessionPhase, to: SessionPhase },
    /// Download progress. Only emitted when the image size is known.
    Progress { received: u64, total: u64, percent: u64 },
    /// Session ended in `Failed`.
    SessionFailed { reason: String },
    /// Session ended in `Aborted`.
    SessionAborted,
    /// Device restart requested after a successful commit.
    RestartRequested { slot: PartitionSlot },
    /// Subscribed to the update topic.
    Subscribed { topic: String },
}

/// Observer trait for receiving update events.
pub trait OtaObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &OtaEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl OtaObserver for NullObserver {
    fn on_event(&self, _event: &OtaEvent) {}
}

/// Observer that keeps every event, for tests and diagnostics.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<OtaEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OtaEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Phases entered, in order.
    pub fn phases(&self) -> Vec<SessionPhase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                OtaEvent::PhaseChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl OtaObserver for RecordingObserver {
    fn on_event(&self, event: &OtaEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl OtaObserver for TracingObserver {
    fn on_event(&self, event: &OtaEvent) {
        match event {
            OtaEvent::BootReconciled {
                slot,
                state,
                outcome,
            } => {
                let slot = slot.map(|s| s.to_string()).unwrap_or_else(|| "?".into());
                let state = state.map(|s| s.to_string()).unwrap_or_else(|| "?".into());
                tracing::info!(slot = %slot, state = %state, outcome = %outcome, "Boot reconciled");
            }
            OtaEvent::NotificationRejected { reason } => {
                tracing::info!(reason = %reason, "Update notification ignored");
            }
            OtaEvent::SessionAdmitted { version, locator } => {
                tracing::info!(version = %version, url = %locator, "Starting OTA update");
            }
            OtaEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            OtaEvent::Progress {
                received,
                total,
                percent,
            } => {
                tracing::debug!(received, total, progress = %format!("{}%", percent), "OTA progress");
            }
            OtaEvent::SessionFailed { reason } => {
                tracing::error!("OTA update failed: {}", reason);
            }
            OtaEvent::SessionAborted => {
                tracing::warn!("OTA update aborted");
            }
            OtaEvent::RestartRequested { slot } => {
                tracing::info!(slot = %slot, "OTA update successful, rebooting");
            }
            OtaEvent::Subscribed { topic } => {
                tracing::info!(topic = %topic, "Subscribed to update topic");
            }
        }
    }
}
