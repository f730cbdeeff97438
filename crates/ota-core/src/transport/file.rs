//! Filesystem-backed transfer for host-side runs.
//!
//! Accepts `file://` URLs and bare paths. Remote schemes are rejected so a
//! notification pointing at a network server fails cleanly instead of being
//! misread as a relative path.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use tracing::{debug, info, instrument};

use super::traits::{BulkTransfer, Chunk, ImageStream, TransferCredentials, TransportError};

const FILE_SCHEME: &str = "file://";

/// Transfer provider reading images from local files.
#[derive(Debug, Clone, Default)]
pub struct FileTransfer {
    /// Directory that relative locators resolve against.
    base_dir: Option<PathBuf>,
}

impl FileTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf, TransportError> {
        let raw = match locator.strip_prefix(FILE_SCHEME) {
            Some(path) => path,
            None if locator.contains("://") => {
                return Err(TransportError::UnsupportedLocator(locator.to_string()));
            }
            None => locator,
        };
        let path = PathBuf::from(raw);
        Ok(match (&self.base_dir, path.is_relative()) {
            (Some(base), true) => base.join(path),
            _ => path,
        })
    }
}

impl BulkTransfer for FileTransfer {
    type Stream = FileStream;

    #[instrument(level = "debug", skip(self, credentials))]
    fn open(
        &self,
        locator: &str,
        credentials: &TransferCredentials,
    ) -> Result<FileStream, TransportError> {
        let path = self.resolve(locator)?;
        if credentials.trust_anchor.is_some() {
            debug!("Trust anchor not applicable to local files");
        }
        let file = File::open(&path).map_err(|e| TransportError::OpenFailed {
            locator: locator.to_string(),
            message: e.to_string(),
        })?;
        let len = file.metadata()?.len();
        info!(path = %path.display(), bytes = len, "Opened image file");
        Ok(FileStream {
            file: Some(file),
            len,
            chunk_size: credentials.chunk_size.max(1),
        })
    }
}

/// Chunked reader over an open image file.
pub struct FileStream {
    file: Option<File>,
    len: u64,
    chunk_size: usize,
}

impl ImageStream for FileStream {
    fn content_length(&self) -> Option<u64> {
        Some(self.len)
    }

    fn read_chunk(&mut self) -> Result<Chunk, TransportError> {
        let Some(file) = self.file.as_mut() else {
            return Err(TransportError::Disconnected);
        };
        let mut buf = vec![0u8; self.chunk_size];
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(Chunk::EndOfStream);
        }
        buf.truncate(n);
        Ok(Chunk::Data(buf))
    }

    fn close(&mut self) {
        self.file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_stream_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        File::create(&path).unwrap().write_all(&[7u8; 10]).unwrap();

        let transfer = FileTransfer::new();
        let creds = TransferCredentials {
            chunk_size: 4,
            ..Default::default()
        };
        let locator = format!("file://{}", path.display());
        let mut s = transfer.open(&locator, &creds).unwrap();
        assert_eq!(s.content_length(), Some(10));

        let mut total = 0;
        loop {
            match s.read_chunk().unwrap() {
                Chunk::Data(d) => {
                    assert!(d.len() <= 4);
                    total += d.len();
                }
                Chunk::EndOfStream => break,
            }
        }
        assert_eq!(total, 10);

        s.close();
        assert!(matches!(s.read_chunk(), Err(TransportError::Disconnected)));
    }

    #[test]
    fn test_relative_locator_uses_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a.bin")).unwrap();
        let transfer = FileTransfer::with_base_dir(dir.path());
        assert!(transfer.open("a.bin", &TransferCredentials::default()).is_ok());
    }

    #[test]
    fn test_remote_scheme_rejected() {
        let transfer = FileTransfer::new();
        assert!(matches!(
            transfer.open("https://example.com/fw.bin", &TransferCredentials::default()),
            Err(TransportError::UnsupportedLocator(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let transfer = FileTransfer::new();
        assert!(matches!(
            transfer.open("/definitely/not/here.bin", &TransferCredentials::default()),
            Err(TransportError::OpenFailed { .. })
        ));
    }
}
