//! Version-change event relay
//!
//! When an apply moves the registry version, exactly one `registry:version`
//! event is broadcast. Publishing is best-effort: a failure is logged and
//! never affects the client reply.

use serde::{Deserialize, Serialize};
use tracing::warn;

use governor_registry::VersionId;

use crate::bus::MessageBus;
use crate::protocol::{EVENT_TOPIC, VERSION_EVENT};

/// Payload of a `registry:version` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEvent {
    pub old_version: String,
    pub new_version: String,
    /// Unix seconds at emission
    pub timestamp: i64,
}

/// Broadcast a version change. Best-effort.
pub fn publish_version_change(bus: &dyn MessageBus, old: &VersionId, new: &VersionId) {
    let event = VersionEvent {
        old_version: old.to_string(),
        new_version: new.to_string(),
        timestamp: chrono::Utc::now().timestamp(),
    };
    let payload = match serde_json::to_value(&event) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "failed to serialize version event");
            return;
        }
    };
    if let Err(e) = bus.publish(EVENT_TOPIC, VERSION_EVENT, payload) {
        warn!(error = %e, old = %old, new = %new, "failed to publish version event");
    }
}
