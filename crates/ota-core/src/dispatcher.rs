//! Update request dispatcher.
//!
//! Turns a raw notification into an [`UpdateOffer`] or a [`RejectReason`].
//! Never touches persistent state.
//!
//! Expected payload:
//!
//! ```json
//! {"version": "1.2.0", "url": "https://fw.example.com/node-1.2.0.bin"}
//! ```
//!
//! Extra fields are ignored.

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::RejectReason;
use crate::identity::{FirmwareIdentity, is_update_needed};
use crate::session::UpdateOffer;

const VERSION_FIELD: &str = "version";
const URL_FIELD: &str = "url";

/// Validates notifications against the running image.
#[derive(Debug, Clone)]
pub struct UpdateDispatcher {
    topic: String,
    running: FirmwareIdentity,
}

impl UpdateDispatcher {
    pub fn new(topic: impl Into<String>, running: FirmwareIdentity) -> Self {
        Self {
            topic: topic.into(),
            running,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Check the delivery topic, then handle the payload.
    pub fn handle_message(&self, topic: &str, raw: &[u8]) -> Result<UpdateOffer, RejectReason> {
        if topic != self.topic {
            debug!(topic = %topic, expected = %self.topic, "Ignoring message on foreign topic");
            return Err(RejectReason::UnexpectedTopic(topic.to_string()));
        }
        self.handle_notification(raw)
    }

    /// Parse and validate an update notification.
    #[instrument(level = "debug", skip_all, fields(len = raw.len()))]
    pub fn handle_notification(&self, raw: &[u8]) -> Result<UpdateOffer, RejectReason> {
        let root: Value = serde_json::from_slice(raw).map_err(|e| {
            warn!(error = %e, "Failed to parse update message");
            RejectReason::MalformedMessage(e.to_string())
        })?;
        let Some(record) = root.as_object() else {
            warn!("Update message is not a JSON object");
            return Err(RejectReason::MalformedMessage("expected a JSON object".into()));
        };

        let version = string_field(record, VERSION_FIELD)?;
        let url = string_field(record, URL_FIELD)?;

        info!(current = %self.running.version, available = %version, "Comparing firmware versions");
        if !is_update_needed(&self.running, version) {
            info!("Current version is up to date");
            return Err(RejectReason::AlreadyCurrent(version.to_string()));
        }

        Ok(UpdateOffer {
            target_version: version.to_string(),
            source_locator: url.to_string(),
        })
    }
}

fn string_field<'a>(
    record: &'a serde_json::Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, RejectReason> {
    record.get(name).and_then(Value::as_str).ok_or_else(|| {
        warn!(field = name, "Invalid update message format");
        RejectReason::MissingField(name)
    })
}
