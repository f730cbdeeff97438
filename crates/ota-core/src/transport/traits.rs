//! Bulk transfer abstraction.
//!
//! Defines the `BulkTransfer` / `ImageStream` traits the fetch-and-apply
//! controller pulls image bytes through, allowing different
//! implementations (file, mock, an HTTPS client on the device).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {locator}: {message}")]
    OpenFailed { locator: String, message: String },

    #[error("Unsupported locator: {0}")]
    UnsupportedLocator(String),

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    #[error("Truncated stream: received {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One read from an image stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(Vec<u8>),
    EndOfStream,
}

/// Material presented when opening a transfer.
#[derive(Debug, Clone)]
pub struct TransferCredentials {
    /// PEM-encoded server trust anchor.
    pub trust_anchor: Option<Vec<u8>>,
    /// Upper bound on any single blocking read.
    pub receive_timeout: Duration,
    /// Preferred read size.
    pub chunk_size: usize,
}

impl Default for TransferCredentials {
    fn default() -> Self {
        Self {
            trust_anchor: None,
            receive_timeout: Duration::from_millis(crate::config::DEFAULT_RECEIVE_TIMEOUT_MS),
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// An open image download.
pub trait ImageStream: Send {
    /// Total image length, when the source announces it.
    fn content_length(&self) -> Option<u64>;

    /// Read the next chunk. Must not block longer than the receive timeout.
    fn read_chunk(&mut self) -> Result<Chunk, TransportError>;

    /// Release the underlying connection.
    fn close(&mut self) {}
}

/// Opens image streams from a locator.
pub trait BulkTransfer: Send + Sync {
    type Stream: ImageStream;

    fn open(
        &self,
        locator: &str,
        credentials: &TransferCredentials,
    ) -> Result<Self::Stream, TransportError>;
}
