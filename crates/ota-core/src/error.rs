//! Error taxonomy for notification handling and update sessions.

use thiserror::Error;

use crate::image::DescriptorError;
use crate::storage::StorageError;
use crate::transport::TransportError;

/// Why a notification did not produce a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("Notification on unexpected topic {0:?}")]
    UnexpectedTopic(String),

    #[error("Malformed update message: {0}")]
    MalformedMessage(String),

    #[error("Update message missing string field {0:?}")]
    MissingField(&'static str),

    #[error("Already running version {0}")]
    AlreadyCurrent(String),

    #[error("Update already in progress")]
    UpdateAlreadyInProgress,

    #[error("Failed to start update task: {0}")]
    TaskSpawnFailed(String),
}

/// Why an admitted session ended in `Failed`.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Image is for project {found:?}, running project is {expected:?}")]
    IncompatibleProject { expected: String, found: String },

    #[error("Transfer error: {0}")]
    TransferError(#[from] TransportError),

    #[error("Image corrupt: {0}")]
    ImageCorrupt(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for SessionError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ImageCorrupt(d) => SessionError::ImageCorrupt(d.to_string()),
            other => SessionError::Storage(other),
        }
    }
}

impl From<DescriptorError> for SessionError {
    fn from(e: DescriptorError) -> Self {
        SessionError::ImageCorrupt(format!("bad image descriptor: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::DigestError;

    #[test]
    fn test_digest_failure_maps_to_image_corrupt() {
        let e: SessionError = StorageError::ImageCorrupt(DigestError::TooSmall {
            actual: 1,
            minimum: 144,
        })
        .into();
        assert!(matches!(e, SessionError::ImageCorrupt(_)));
    }

    #[test]
    fn test_io_failure_stays_storage() {
        let e: SessionError = StorageError::Io(std::io::Error::other("disk")).into();
        assert!(matches!(e, SessionError::Storage(_)));
    }
}
