//! Mock bulk transfer for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::traits::{BulkTransfer, Chunk, ImageStream, TransferCredentials, TransportError};

/// Scripted response for one read.
#[derive(Debug, Clone)]
pub enum MockRead {
    Data(Vec<u8>),
    EndOfStream,
    Timeout,
    Disconnect,
}

#[derive(Debug, Clone, Default)]
struct Script {
    content_length: Option<u64>,
    reads: VecDeque<MockRead>,
}

/// Mock transfer serving scripted streams per locator.
#[derive(Clone, Default)]
pub struct MockTransfer {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    /// Locators opened, in order, with the trust anchor presented.
    open_log: Arc<Mutex<Vec<(String, Option<Vec<u8>>)>>>,
    /// Optional gate the stream waits on before its first read.
    hold: Arc<Mutex<Option<std::sync::mpsc::Receiver<()>>>>,
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `image` at `locator` in `chunk_size` pieces, announcing its length.
    pub fn serve_image(&self, locator: &str, image: &[u8], chunk_size: usize) {
        let mut reads: VecDeque<MockRead> = image
            .chunks(chunk_size.max(1))
            .map(|c| MockRead::Data(c.to_vec()))
            .collect();
        reads.push_back(MockRead::EndOfStream);
        self.script(locator, Some(image.len() as u64), reads);
    }

    /// Install an arbitrary read script.
    pub fn script(
        &self,
        locator: &str,
        content_length: Option<u64>,
        reads: impl IntoIterator<Item = MockRead>,
    ) {
        self.scripts.lock().unwrap().insert(
            locator.to_string(),
            Script {
                content_length,
                reads: reads.into_iter().collect(),
            },
        );
    }

    /// Block the next opened stream's first read until the returned sender fires.
    pub fn hold_first_read(&self) -> std::sync::mpsc::Sender<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        *self.hold.lock().unwrap() = Some(rx);
        tx
    }

    /// Get all opened locators.
    pub fn opened(&self) -> Vec<String> {
        self.open_log
            .lock()
            .unwrap()
            .iter()
            .map(|(l, _)| l.clone())
            .collect()
    }

    /// Trust anchor presented on the most recent open.
    pub fn last_trust_anchor(&self) -> Option<Vec<u8>> {
        self.open_log
            .lock()
            .unwrap()
            .last()
            .and_then(|(_, a)| a.clone())
    }
}

impl BulkTransfer for MockTransfer {
    type Stream = MockStream;

    fn open(
        &self,
        locator: &str,
        credentials: &TransferCredentials,
    ) -> Result<MockStream, TransportError> {
        self.open_log
            .lock()
            .unwrap()
            .push((locator.to_string(), credentials.trust_anchor.clone()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or_else(|| TransportError::OpenFailed {
                locator: locator.to_string(),
                message: "404 Not Found".into(),
            })?;
        Ok(MockStream {
            script,
            timeout_ms: credentials.receive_timeout.as_millis() as u64,
            hold: self.hold.lock().unwrap().take(),
        })
    }
}

/// Stream replaying a [`MockRead`] script.
pub struct MockStream {
    script: Script,
    timeout_ms: u64,
    hold: Option<std::sync::mpsc::Receiver<()>>,
}

impl ImageStream for MockStream {
    fn content_length(&self) -> Option<u64> {
        self.script.content_length
    }

    fn read_chunk(&mut self) -> Result<Chunk, TransportError> {
        if let Some(hold) = self.hold.take() {
            let _ = hold.recv();
        }
        match self.script.reads.pop_front() {
            Some(MockRead::Data(d)) => Ok(Chunk::Data(d)),
            Some(MockRead::EndOfStream) => Ok(Chunk::EndOfStream),
            Some(MockRead::Timeout) | None => Err(TransportError::Timeout {
                timeout_ms: self.timeout_ms,
            }),
            Some(MockRead::Disconnect) => Err(TransportError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_serves_chunks() {
        let mock = MockTransfer::new();
        mock.serve_image("https://fw/a.bin", &[1, 2, 3, 4, 5], 2);

        let mut s = mock
            .open("https://fw/a.bin", &TransferCredentials::default())
            .unwrap();
        assert_eq!(s.content_length(), Some(5));
        assert_eq!(s.read_chunk().unwrap(), Chunk::Data(vec![1, 2]));
        assert_eq!(s.read_chunk().unwrap(), Chunk::Data(vec![3, 4]));
        assert_eq!(s.read_chunk().unwrap(), Chunk::Data(vec![5]));
        assert_eq!(s.read_chunk().unwrap(), Chunk::EndOfStream);

        // Script exhausted behaves like a silent peer
        assert!(matches!(s.read_chunk(), Err(TransportError::Timeout { .. })));
    }

    #[test]
    fn test_mock_unknown_locator() {
        let mock = MockTransfer::new();
        assert!(mock.open("nope", &TransferCredentials::default()).is_err());
        assert_eq!(mock.opened(), vec!["nope".to_string()]);
    }

    #[test]
    fn test_mock_records_trust_anchor() {
        let mock = MockTransfer::new();
        mock.serve_image("u", b"x", 1);
        let creds = TransferCredentials {
            trust_anchor: Some(b"-----BEGIN CERTIFICATE-----".to_vec()),
            ..Default::default()
        };
        mock.open("u", &creds).unwrap();
        assert_eq!(
            mock.last_trust_anchor().as_deref(),
            Some(&b"-----BEGIN CERTIFICATE-----"[..])
        );
    }
}
