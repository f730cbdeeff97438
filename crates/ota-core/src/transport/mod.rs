//! Transport layer module.

pub mod file;
pub mod mock;
pub mod traits;

pub use file::{FileStream, FileTransfer};
pub use mock::{MockRead, MockStream, MockTransfer};
pub use traits::{BulkTransfer, Chunk, ImageStream, TransferCredentials, TransportError};
