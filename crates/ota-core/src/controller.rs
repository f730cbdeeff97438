//! Image fetch-and-apply controller.
//!
//! Drives one admitted session through
//! `Starting -> HeaderValidated -> Downloading -> Committing -> Committed`,
//! or into `Failed` / `Aborted`. Only the inactive partition is ever written,
//! and nothing is written until the embedded descriptor has been checked.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use tracing::{debug, info, instrument, warn};

use crate::error::SessionError;
use crate::events::{OtaEvent, OtaObserver};
use crate::gate::GateToken;
use crate::identity::FirmwareIdentity;
use crate::image::{DESCRIPTOR_SIZE, DescriptorError, ImageDescriptor};
use crate::session::{SessionPhase, UpdateSession};
use crate::storage::{PartitionSlot, PartitionStore, PartitionWriter, StorageError};
use crate::transport::{BulkTransfer, Chunk, ImageStream, TransferCredentials, TransportError};

/// Progress is logged at info level every this many percent.
const PROGRESS_LOG_STEP: u64 = 10;

/// Device restart capability.
pub trait Restart: Send + Sync {
    /// Reset the device. On hardware this does not return.
    fn restart(&self);
}

/// Restart stand-in that only counts requests.
#[derive(Debug, Default)]
pub struct RecordingRestart {
    count: AtomicU32,
}

impl RecordingRestart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Restart for RecordingRestart {
    fn restart(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// New image committed to `slot`, restart requested.
    Committed { slot: PartitionSlot },
    /// Cancelled before completion.
    Aborted,
    /// Ended with an error.
    Failed(SessionError),
}

/// Final state of a session.
#[derive(Debug)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub phase: SessionPhase,
    pub bytes_received: u64,
    pub bytes_expected: Option<u64>,
}

/// Why the happy path stopped.
enum Interrupt {
    Cancelled,
    Failed(SessionError),
}

impl From<SessionError> for Interrupt {
    fn from(e: SessionError) -> Self {
        Interrupt::Failed(e)
    }
}

impl From<TransportError> for Interrupt {
    fn from(e: TransportError) -> Self {
        Interrupt::Failed(e.into())
    }
}

impl From<StorageError> for Interrupt {
    fn from(e: StorageError) -> Self {
        Interrupt::Failed(e.into())
    }
}

/// Runs fetch-and-apply sessions.
pub struct FetchApplyController<T: BulkTransfer, P: PartitionStore, O: OtaObserver> {
    transfer: Arc<T>,
    store: Arc<P>,
    restart: Arc<dyn Restart>,
    observer: Arc<O>,
    running: FirmwareIdentity,
    credentials: TransferCredentials,
}

impl<T: BulkTransfer, P: PartitionStore, O: OtaObserver> Clone for FetchApplyController<T, P, O> {
    fn clone(&self) -> Self {
        Self {
            transfer: Arc::clone(&self.transfer),
            store: Arc::clone(&self.store),
            restart: Arc::clone(&self.restart),
            observer: Arc::clone(&self.observer),
            running: self.running.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

impl<T: BulkTransfer, P: PartitionStore, O: OtaObserver> FetchApplyController<T, P, O> {
    pub fn new(
        transfer: Arc<T>,
        store: Arc<P>,
        restart: Arc<dyn Restart>,
        observer: Arc<O>,
        running: FirmwareIdentity,
        credentials: TransferCredentials,
    ) -> Self {
        Self {
            transfer,
            store,
            restart,
            observer,
            running,
            credentials,
        }
    }

    /// Run `session` to a terminal phase.
    ///
    /// `Failed` and `Aborted` release the gate; `Committed` keeps it held and
    /// requests a restart.
    #[instrument(skip_all, fields(version = %session.offer.target_version))]
    pub fn run(&self, mut session: UpdateSession, token: GateToken) -> SessionReport {
        info!(url = %session.offer.source_locator, "Starting OTA task");

        let outcome = match self.execute(&mut session) {
            Ok(slot) => {
                self.transition(&mut session, SessionPhase::Committed);
                token.retain();
                self.observer.on_event(&OtaEvent::RestartRequested { slot });
                self.restart.restart();
                SessionOutcome::Committed { slot }
            }
            Err(Interrupt::Cancelled) => {
                self.transition(&mut session, SessionPhase::Aborted);
                self.observer.on_event(&OtaEvent::SessionAborted);
                token.release();
                SessionOutcome::Aborted
            }
            Err(Interrupt::Failed(e)) => {
                self.transition(&mut session, SessionPhase::Failed);
                self.observer.on_event(&OtaEvent::SessionFailed {
                    reason: e.to_string(),
                });
                token.release();
                SessionOutcome::Failed(e)
            }
        };

        SessionReport {
            outcome,
            phase: session.phase,
            bytes_received: session.bytes_received,
            bytes_expected: session.bytes_expected,
        }
    }

    fn execute(&self, session: &mut UpdateSession) -> Result<PartitionSlot, Interrupt> {
        check_cancel(session)?;
        let mut stream = self
            .transfer
            .open(&session.offer.source_locator, &self.credentials)
            .map_err(|e| {
                warn!(error = %e, "OTA begin failed");
                SessionError::from(e)
            })?;
        let result = self.fetch_and_apply(session, &mut stream);
        stream.close();
        result
    }

    fn fetch_and_apply(
        &self,
        session: &mut UpdateSession,
        stream: &mut T::Stream,
    ) -> Result<PartitionSlot, Interrupt> {
        session.bytes_expected = stream.content_length();

        // Starting -> HeaderValidated
        let head = self.read_descriptor(session, stream)?;
        let descriptor = ImageDescriptor::from_bytes(&head).map_err(|e: DescriptorError| {
            warn!(error = %e, "Failed to read image descriptor");
            SessionError::from(e)
        })?;
        self.validate_header(&descriptor.identity)?;
        self.transition(session, SessionPhase::HeaderValidated);

        // HeaderValidated -> Downloading
        let slot = self.store.inactive()?;
        let mut writer = self.store.begin_write(slot)?;
        info!(slot = %slot, "Writing to inactive partition");
        self.transition(session, SessionPhase::Downloading);

        if let Err(e) = self.stream_body(session, stream, &mut writer, &head) {
            writer.abort();
            return Err(e);
        }

        // Downloading -> Committing
        self.transition(session, SessionPhase::Committing);
        writer.finalize().map_err(|e: StorageError| {
            warn!(error = %e, "Image validation failed, image is corrupted");
            SessionError::from(e)
        })?;
        self.store.set_boot_pending(slot)?;
        info!(slot = %slot, "Partition marked pending verification");
        Ok(slot)
    }

    /// Buffer reads until the whole descriptor is available.
    fn read_descriptor(
        &self,
        session: &mut UpdateSession,
        stream: &mut T::Stream,
    ) -> Result<Vec<u8>, Interrupt> {
        let mut head = Vec::with_capacity(DESCRIPTOR_SIZE);
        while head.len() < DESCRIPTOR_SIZE {
            check_cancel(session)?;
            match stream.read_chunk()? {
                Chunk::Data(data) => {
                    session.bytes_received += data.len() as u64;
                    head.extend_from_slice(&data);
                    self.check_overrun(session)?;
                }
                Chunk::EndOfStream if session.bytes_expected == Some(session.bytes_received) => {
                    // Complete stream, but too short to hold a descriptor.
                    return Err(SessionError::ImageCorrupt(format!(
                        "image is {} bytes, descriptor needs {}",
                        session.bytes_received, DESCRIPTOR_SIZE
                    ))
                    .into());
                }
                Chunk::EndOfStream => {
                    return Err(TransportError::Truncated {
                        received: session.bytes_received,
                        expected: session.bytes_expected.unwrap_or(DESCRIPTOR_SIZE as u64),
                    }
                    .into());
                }
            }
        }
        Ok(head)
    }

    /// Reject images from a different project before anything is written.
    fn validate_header(&self, candidate: &FirmwareIdentity) -> Result<(), SessionError> {
        if !self.running.is_compatible_with(candidate) {
            warn!(
                found = %candidate.project_name,
                expected = %self.running.project_name,
                "OTA firmware is from a different project"
            );
            return Err(SessionError::IncompatibleProject {
                expected: self.running.project_name.clone(),
                found: candidate.project_name.clone(),
            });
        }
        info!(
            running = %self.running.version,
            new = %candidate.version,
            built = %candidate.build_timestamp,
            "Image header validated"
        );
        Ok(())
    }

    fn stream_body(
        &self,
        session: &mut UpdateSession,
        stream: &mut T::Stream,
        writer: &mut P::Writer,
        head: &[u8],
    ) -> Result<(), Interrupt> {
        let mut last_logged = 0;
        writer.write(head)?;
        self.report_progress(session, &mut last_logged);

        loop {
            check_cancel(session)?;
            match stream.read_chunk()? {
                Chunk::Data(data) => {
                    session.bytes_received += data.len() as u64;
                    self.check_overrun(session)?;
                    writer.write(&data)?;
                    self.report_progress(session, &mut last_logged);
                }
                Chunk::EndOfStream => break,
            }
            // Let connectivity maintenance run between chunks.
            thread::yield_now();
        }

        if let Some(expected) = session.bytes_expected
            && session.bytes_received < expected
        {
            warn!(received = session.bytes_received, expected, "Stream ended early");
            return Err(TransportError::Truncated {
                received: session.bytes_received,
                expected,
            }
            .into());
        }
        debug!(bytes = writer.bytes_written(), "Download complete");
        Ok(())
    }

    fn check_overrun(&self, session: &UpdateSession) -> Result<(), TransportError> {
        match session.bytes_expected {
            Some(expected) if session.bytes_received > expected => {
                Err(TransportError::MalformedStream(format!(
                    "received {} bytes, announced {}",
                    session.bytes_received, expected
                )))
            }
            _ => Ok(()),
        }
    }

    fn report_progress(&self, session: &UpdateSession, last_logged: &mut u64) {
        let (Some(total), Some(percent)) = (session.bytes_expected, session.progress_percent())
        else {
            return;
        };
        self.observer.on_event(&OtaEvent::Progress {
            received: session.bytes_received,
            total,
            percent,
        });
        if percent >= *last_logged + PROGRESS_LOG_STEP || (percent == 100 && *last_logged < 100) {
            info!("OTA progress: {}%", percent);
            *last_logged = percent;
        }
    }

    fn transition(&self, session: &mut UpdateSession, to: SessionPhase) {
        let from = session.phase;
        session.phase = to;
        self.observer
            .on_event(&OtaEvent::PhaseChanged { from, to });
    }
}

fn check_cancel(session: &UpdateSession) -> Result<(), Interrupt> {
    if session.is_cancelled() {
        return Err(Interrupt::Cancelled);
    }
    Ok(())
}
