//! Firmware image format: embedded descriptor and digest trailer.

pub mod constants;
pub mod descriptor;
pub mod digest;

pub use constants::*;
pub use descriptor::{DescriptorError, ImageDescriptor};
pub use digest::{DigestError, DigestVerifier, pack_image, verify_image};
