//! Firmware identity and version comparison.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::image::DescriptorError;

/// Identifies a firmware image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareIdentity {
    /// Product / project the image was built for.
    pub project_name: String,
    /// Free-form version string.
    pub version: String,
    /// Opaque build timestamp.
    pub build_timestamp: String,
}

impl FirmwareIdentity {
    pub fn new(
        project_name: impl Into<String>,
        version: impl Into<String>,
        build_timestamp: impl Into<String>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            version: version.into(),
            build_timestamp: build_timestamp.into(),
        }
    }

    /// Two images are compatible iff their project names match exactly.
    pub fn is_compatible_with(&self, other: &FirmwareIdentity) -> bool {
        self.project_name == other.project_name
    }
}

impl fmt::Display for FirmwareIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.project_name, self.version, self.build_timestamp)
    }
}

/// Decide whether `candidate_version` should replace the running image.
///
/// Only byte-exact equality counts as "current". There is no semantic
/// ordering: downgrades and oddly formatted versions are reported as needed,
/// and the project-name check during header validation is what keeps
/// foreign images out.
pub fn is_update_needed(running: &FirmwareIdentity, candidate_version: &str) -> bool {
    running.version.as_bytes() != candidate_version.as_bytes()
}

/// Source of the running image's identity.
pub trait RunningImage: Send + Sync {
    fn running_identity(&self) -> Result<FirmwareIdentity, DescriptorError>;
}

impl RunningImage for FirmwareIdentity {
    fn running_identity(&self) -> Result<FirmwareIdentity, DescriptorError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> FirmwareIdentity {
        FirmwareIdentity::new("sensor-node", "1.0.0", "Jan 01 2026 12:00:00")
    }

    #[test]
    fn test_same_version_not_needed() {
        assert!(!is_update_needed(&running(), "1.0.0"));
    }

    #[test]
    fn test_any_difference_is_needed() {
        let r = running();
        assert!(is_update_needed(&r, "1.0.1"));
        assert!(is_update_needed(&r, "0.9.0"));
        assert!(is_update_needed(&r, "1.0.0 "));
        assert!(is_update_needed(&r, "v1.0.0"));
        assert!(is_update_needed(&r, ""));
        assert!(is_update_needed(&r, "not-a-version"));
    }

    #[test]
    fn test_comparison_is_case_sensitive() {
        let r = FirmwareIdentity::new("p", "1.0.0-RC1", "");
        assert!(is_update_needed(&r, "1.0.0-rc1"));
    }

    #[test]
    fn test_compatibility_is_project_name_only() {
        let r = running();
        let same_project = FirmwareIdentity::new("sensor-node", "2.0.0", "later");
        let other_project = FirmwareIdentity::new("Sensor-Node", "1.0.0", "Jan 01 2026 12:00:00");
        assert!(r.is_compatible_with(&same_project));
        assert!(!r.is_compatible_with(&other_project));
    }
}
