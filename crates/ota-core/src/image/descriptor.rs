//! Embedded image descriptor.
//!
//! Every image starts with a fixed 0x70-byte little-endian descriptor:
//!
//! ```text
//! 0x00  u32      magic ("OTAI")
//! 0x04  u16      format version
//! 0x06  u16      reserved
//! 0x08  [u32; 2] reserved
//! 0x10  [u8; 32] project name (NUL padded)
//! 0x30  [u8; 32] version (NUL padded)
//! 0x50  [u8; 32] build timestamp (NUL padded)
//! ```

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::*;
use crate::identity::FirmwareIdentity;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid magic: expected 0x{expected:08X}, got 0x{actual:08X}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("Unsupported descriptor format {0}")]
    UnsupportedFormat(u16),
    #[error("Field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
    #[error("Field {field} is {len} bytes, limit is {FIELD_LEN}")]
    FieldTooLong { field: &'static str, len: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed image descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub format_version: u16,
    pub identity: FirmwareIdentity,
}

impl ImageDescriptor {
    pub const SIZE: usize = DESCRIPTOR_SIZE;

    pub fn new(identity: FirmwareIdentity) -> Self {
        Self {
            format_version: DESCRIPTOR_FORMAT_VERSION,
            identity,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DescriptorError> {
        if data.len() < Self::SIZE {
            return Err(DescriptorError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != DESCRIPTOR_MAGIC {
            return Err(DescriptorError::InvalidMagic {
                expected: DESCRIPTOR_MAGIC,
                actual: magic,
            });
        }
        let format_version = cursor.read_u16::<LittleEndian>()?;
        if format_version != DESCRIPTOR_FORMAT_VERSION {
            return Err(DescriptorError::UnsupportedFormat(format_version));
        }

        Ok(Self {
            format_version,
            identity: FirmwareIdentity {
                project_name: read_field(data, PROJECT_NAME_OFFSET, "project_name")?,
                version: read_field(data, VERSION_OFFSET, "version")?,
                build_timestamp: read_field(data, BUILD_TIMESTAMP_OFFSET, "build_timestamp")?,
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DescriptorError> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&DESCRIPTOR_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        write_field(&mut buf, PROJECT_NAME_OFFSET, "project_name", &self.identity.project_name)?;
        write_field(&mut buf, VERSION_OFFSET, "version", &self.identity.version)?;
        write_field(
            &mut buf,
            BUILD_TIMESTAMP_OFFSET,
            "build_timestamp",
            &self.identity.build_timestamp,
        )?;
        Ok(buf)
    }
}

fn read_field(data: &[u8], offset: usize, field: &'static str) -> Result<String, DescriptorError> {
    let raw = &data[offset..offset + FIELD_LEN];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(FIELD_LEN);
    String::from_utf8(raw[..end].to_vec()).map_err(|_| DescriptorError::InvalidUtf8 { field })
}

fn write_field(
    buf: &mut [u8],
    offset: usize,
    field: &'static str,
    value: &str,
) -> Result<(), DescriptorError> {
    let bytes = value.as_bytes();
    if bytes.len() > FIELD_LEN {
        return Err(DescriptorError::FieldTooLong {
            field,
            len: bytes.len(),
        });
    }
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ImageDescriptor {
        ImageDescriptor::new(FirmwareIdentity::new("sensor-node", "1.2.0", "2026-10-01T08:00:00Z"))
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let bytes = descriptor().to_bytes().unwrap();
        assert_eq!(bytes.len(), ImageDescriptor::SIZE);
        assert_eq!(&bytes[0..4], b"OTAI");

        let parsed = ImageDescriptor::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, descriptor());
    }

    #[test]
    fn test_short_buffer_rejected() {
        let bytes = descriptor().to_bytes().unwrap();
        let err = ImageDescriptor::from_bytes(&bytes[..40]).unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::BufferTooSmall { expected: 0x70, actual: 40 }
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = descriptor().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            ImageDescriptor::from_bytes(&bytes),
            Err(DescriptorError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut bytes = descriptor().to_bytes().unwrap();
        bytes[4] = 9;
        assert!(matches!(
            ImageDescriptor::from_bytes(&bytes),
            Err(DescriptorError::UnsupportedFormat(9))
        ));
    }

    #[test]
    fn test_full_width_field_has_no_terminator() {
        let name = "x".repeat(FIELD_LEN);
        let d = ImageDescriptor::new(FirmwareIdentity::new(name.clone(), "1", "t"));
        let parsed = ImageDescriptor::from_bytes(&d.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.identity.project_name, name);
    }

    #[test]
    fn test_oversized_field_rejected() {
        let d = ImageDescriptor::new(FirmwareIdentity::new("p", "v".repeat(FIELD_LEN + 1), "t"));
        assert!(matches!(
            d.to_bytes(),
            Err(DescriptorError::FieldTooLong { field: "version", .. })
        ));
    }
}
