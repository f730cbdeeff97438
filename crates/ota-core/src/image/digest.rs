//! Image digest trailer.
//!
//! An image is `descriptor || body || sha256(descriptor || body)`. The
//! verifier is fed the stream incrementally and holds back the last
//! [`DIGEST_LEN`] bytes, since they are only known to be the trailer once
//! the stream ends.

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::constants::{DIGEST_LEN, MIN_IMAGE_SIZE};
use super::descriptor::{DescriptorError, ImageDescriptor};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("Image too small: {actual} bytes, minimum {minimum}")]
    TooSmall { actual: u64, minimum: u64 },
    #[error("Digest mismatch: trailer {expected}, computed {actual}")]
    Mismatch { expected: String, actual: String },
}

/// Incremental SHA-256 trailer check.
#[derive(Clone, Default)]
pub struct DigestVerifier {
    hasher: Sha256,
    tail: Vec<u8>,
    total: u64,
}

impl DigestVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next slice of the image.
    pub fn update(&mut self, data: &[u8]) {
        self.total += data.len() as u64;
        self.tail.extend_from_slice(data);
        if self.tail.len() > DIGEST_LEN {
            let spill = self.tail.len() - DIGEST_LEN;
            self.hasher.update(&self.tail[..spill]);
            self.tail.drain(..spill);
        }
    }

    /// Total bytes seen so far, trailer included.
    pub fn bytes_seen(&self) -> u64 {
        self.total
    }

    /// Compare the held-back trailer against the running hash.
    pub fn finish(self) -> Result<(), DigestError> {
        if self.total < MIN_IMAGE_SIZE as u64 {
            return Err(DigestError::TooSmall {
                actual: self.total,
                minimum: MIN_IMAGE_SIZE as u64,
            });
        }
        let computed = self.hasher.finalize();
        if computed.as_slice() != self.tail.as_slice() {
            return Err(DigestError::Mismatch {
                expected: hex::encode(&self.tail),
                actual: hex::encode(computed),
            });
        }
        Ok(())
    }
}

/// Verify a complete in-memory image.
pub fn verify_image(image: &[u8]) -> Result<(), DigestError> {
    let mut verifier = DigestVerifier::new();
    verifier.update(image);
    verifier.finish()
}

/// Build an image from a descriptor and body, appending the digest trailer.
pub fn pack_image(descriptor: &ImageDescriptor, body: &[u8]) -> Result<Vec<u8>, DescriptorError> {
    let mut image = descriptor.to_bytes()?;
    image.extend_from_slice(body);
    let digest = Sha256::digest(&image);
    image.extend_from_slice(&digest);
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FirmwareIdentity;

    fn image(body: &[u8]) -> Vec<u8> {
        let d = ImageDescriptor::new(FirmwareIdentity::new("sensor-node", "2.0.0", "t"));
        pack_image(&d, body).unwrap()
    }

    #[test]
    fn test_packed_image_verifies() {
        let img = image(&[0xA5; 1000]);
        assert_eq!(img.len(), ImageDescriptor::SIZE + 1000 + DIGEST_LEN);
        assert!(verify_image(&img).is_ok());
    }

    #[test]
    fn test_streaming_matches_whole() {
        let img = image(&(0..=255u8).cycle().take(4096).collect::<Vec<_>>());
        let mut verifier = DigestVerifier::new();
        // Uneven slices, including ones smaller than the trailer.
        for chunk in img.chunks(7) {
            verifier.update(chunk);
        }
        assert_eq!(verifier.bytes_seen(), img.len() as u64);
        assert!(verifier.finish().is_ok());
    }

    #[test]
    fn test_flipped_body_byte_detected() {
        let mut img = image(&[1, 2, 3, 4, 5]);
        img[ImageDescriptor::SIZE + 2] ^= 0xFF;
        assert!(matches!(verify_image(&img), Err(DigestError::Mismatch { .. })));
    }

    #[test]
    fn test_flipped_trailer_byte_detected() {
        let mut img = image(b"payload");
        let last = img.len() - 1;
        img[last] ^= 0x01;
        assert!(matches!(verify_image(&img), Err(DigestError::Mismatch { .. })));
    }

    #[test]
    fn test_truncated_image_too_small() {
        let img = image(b"");
        assert!(matches!(
            verify_image(&img[..MIN_IMAGE_SIZE - 1]),
            Err(DigestError::TooSmall { .. })
        ));
    }
}
