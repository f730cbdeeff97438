//! OTA-Core: over-the-air firmware update agent for dual-slot devices.
//!
//! Listens for update notifications, fetches the announced image over a
//! bulk transfer, writes it to the inactive partition, verifies it, and
//! restarts into it. On the next boot the new image confirms itself;
//! otherwise the bootloader rolls back.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Image**: Descriptor layout, digest trailer, image packing
//! - **Transport**: Bulk transfer abstraction (file, mock)
//! - **Storage**: Dual-slot partitions and boot record (directory, memory)
//! - **Dispatcher**: Notification parsing and version check
//! - **Gate**: Single-flight admission of update sessions
//! - **Controller**: Fetch-and-apply state machine
//! - **Boot**: First-boot confirmation
//! - **Link**: Reconnects and topic subscription
//! - **Events**: Observer pattern for logging and telemetry
//! - **Agent**: Top-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ota_core::{AgentConfig, DirPartitions, FileTransfer, OtaAgent, RecordingRestart, TracingObserver};
//!
//! let config = AgentConfig::default();
//! let store = Arc::new(DirPartitions::open(&config.partition_dir).expect("open partitions"));
//! // Confirms a pending image before any fallible setup.
//! let (agent, _boot) = OtaAgent::start(
//!     &config,
//!     store.as_ref(),
//!     Arc::new(FileTransfer::new()),
//!     Arc::clone(&store),
//!     Arc::new(RecordingRestart::new()),
//!     Arc::new(TracingObserver),
//! )
//! .expect("agent");
//!
//! let handle = agent
//!     .on_notification(br#"{"version":"1.1.0","url":"file:///tmp/fw-1.1.0.bin"}"#)
//!     .expect("accepted");
//! handle.wait().expect("session task");
//! ```

pub mod agent;
pub mod boot;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod gate;
pub mod identity;
pub mod image;
pub mod link;
pub mod session;
pub mod storage;
pub mod transport;

// Re-exports for convenience
pub use agent::{OtaAgent, SessionHandle};
pub use boot::reconcile_boot_state;
pub use config::AgentConfig;
pub use controller::{
    FetchApplyController, RecordingRestart, Restart, SessionOutcome, SessionReport,
};
pub use dispatcher::UpdateDispatcher;
pub use error::{RejectReason, SessionError};
pub use events::{
    BootOutcome, NullObserver, OtaEvent, OtaObserver, RecordingObserver, TracingObserver,
};
pub use gate::{GateToken, UpdateGate};
pub use identity::{FirmwareIdentity, RunningImage, is_update_needed};
pub use image::{ImageDescriptor, pack_image, verify_image};
pub use link::{ConnectivityEvent, Link, LinkStatus, LinkSupervisor, MessageChannel};
pub use session::{SessionPhase, UpdateOffer, UpdateSession};
pub use storage::{
    DirPartitions, MemoryPartitions, PartitionSlot, PartitionState, PartitionStore,
};
pub use transport::{BulkTransfer, FileTransfer, MockTransfer, TransportError};
