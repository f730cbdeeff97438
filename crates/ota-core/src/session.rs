//! Update offers and sessions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A proposed update extracted from a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOffer {
    pub target_version: String,
    pub source_locator: String,
}

/// Fetch-and-apply phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Admitted, transfer not yet validated.
    Starting,
    /// Embedded identity checked against the running image.
    HeaderValidated,
    /// Streaming into the inactive partition.
    Downloading,
    /// Finalizing the write and selecting the new partition.
    Committing,
    /// Restart requested. Success terminal.
    Committed,
    /// Cancelled.
    Aborted,
    /// Ended with an error.
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Committed | SessionPhase::Aborted | SessionPhase::Failed
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Starting => write!(f, "Starting"),
            SessionPhase::HeaderValidated => write!(f, "Header Validated"),
            SessionPhase::Downloading => write!(f, "Downloading"),
            SessionPhase::Committing => write!(f, "Committing"),
            SessionPhase::Committed => write!(f, "Committed"),
            SessionPhase::Aborted => write!(f, "Aborted"),
            SessionPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Cancellation flag shared between a session and its handle.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The in-progress attempt to fetch and apply one offer.
#[derive(Debug)]
pub struct UpdateSession {
    pub offer: UpdateOffer,
    pub bytes_expected: Option<u64>,
    pub bytes_received: u64,
    pub phase: SessionPhase,
    cancel: CancelFlag,
}

impl UpdateSession {
    pub(crate) fn new(offer: UpdateOffer) -> Self {
        Self {
            offer,
            bytes_expected: None,
            bytes_received: 0,
            phase: SessionPhase::Starting,
            cancel: CancelFlag::new(),
        }
    }

    /// Integer download progress, when the total is known.
    pub fn progress_percent(&self) -> Option<u64> {
        match self.bytes_expected {
            Some(total) if total > 0 => Some(self.bytes_received * 100 / total),
            _ => None,
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
