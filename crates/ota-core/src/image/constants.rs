//! Image layout constants.

/// Descriptor magic, `"OTAI"` when read as little-endian bytes.
pub const DESCRIPTOR_MAGIC: u32 = 0x4941_544F;

/// Current descriptor format revision.
pub const DESCRIPTOR_FORMAT_VERSION: u16 = 1;

/// Width of each NUL-padded string field in the descriptor.
pub const FIELD_LEN: usize = 32;

/// Offset of the project name field.
pub const PROJECT_NAME_OFFSET: usize = 0x10;
/// Offset of the version field.
pub const VERSION_OFFSET: usize = PROJECT_NAME_OFFSET + FIELD_LEN;
/// Offset of the build timestamp field.
pub const BUILD_TIMESTAMP_OFFSET: usize = VERSION_OFFSET + FIELD_LEN;

/// Total descriptor size (0x70).
pub const DESCRIPTOR_SIZE: usize = BUILD_TIMESTAMP_OFFSET + FIELD_LEN;

/// SHA-256 trailer appended after the image body.
pub const DIGEST_LEN: usize = 32;

/// Smallest well-formed image: descriptor plus trailer, empty body.
pub const MIN_IMAGE_SIZE: usize = DESCRIPTOR_SIZE + DIGEST_LEN;
