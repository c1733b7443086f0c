//! Wire protocol: command and reply envelopes
//!
//! Commands travel to the coordinator on the governance command topic;
//! replies come back on the per-request ephemeral channel named in
//! `respond_to`. Both envelopes are serde-serialized JSON values so
//! unknown operations and extension-carried keys survive transport.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Topic the coordinator listens on for commands.
pub const COMMAND_TOPIC: &str = "registry.governance.command";

/// Topic version-change events are broadcast on.
pub const EVENT_TOPIC: &str = "wippy.central";

/// Event name of a version-change notification.
pub const VERSION_EVENT: &str = "registry:version";

/// Open string→value mapping used for command options and carried keys.
pub type OptionsMap = Map<String, Value>;

/// The mutating and read operations the coordinator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ApplyChanges,
    ApplyVersion,
    Upload,
    Download,
    GetState,
}

impl OperationKind {
    /// Parse the wire form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "apply_changes" => Some(Self::ApplyChanges),
            "apply_version" => Some(Self::ApplyVersion),
            "upload" => Some(Self::Upload),
            "download" => Some(Self::Download),
            "get_state" => Some(Self::GetState),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplyChanges => "apply_changes",
            Self::ApplyVersion => "apply_version",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::GetState => "get_state",
        }
    }

    /// Whether the operation mutates coordinator or registry state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::GetState)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command envelope sent on [`COMMAND_TOPIC`].
///
/// `operation` stays a raw string so the coordinator can answer unknown
/// operations with a structured error instead of a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Fresh unique request id; echoed as `request_id` in the reply
    pub id: String,
    pub operation: String,
    /// Ephemeral channel the reply is delivered on
    pub respond_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Unix seconds at submission
    pub timestamp: i64,
    /// Raw operation list; screened by the pipeline's pre-processor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "OptionsMap::is_empty")]
    pub options: OptionsMap,
}

/// One per-item diagnostic attached to a pipeline result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    /// Subject of the diagnostic (entry id, `item:<n>`, `version:<id>`, …)
    pub id: String,
    /// Diagnostic class: `validation`, `warning`, `error`, …
    #[serde(rename = "type")]
    pub detail_type: String,
    pub message: String,
    /// Extension-specific payload; empty for plain diagnostics
    #[serde(flatten)]
    pub extra: OptionsMap,
}

impl Detail {
    pub fn new(
        id: impl Into<String>,
        detail_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            detail_type: detail_type.into(),
            message: message.into(),
            extra: OptionsMap::new(),
        }
    }

    pub fn validation(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, "validation", message)
    }

    pub fn warning(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, "warning", message)
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, "error", message)
    }
}

/// Reply envelope delivered on the channel named in `respond_to`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub request_id: String,
    #[serde(default)]
    pub success: bool,
    /// Unix seconds at reply
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Detail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    /// Keys carried by processors through the pipeline
    #[serde(flatten)]
    pub extra: OptionsMap,
}

impl ReplyEnvelope {
    /// A failure reply with a message and an optional low-level error.
    pub fn failure(
        request_id: impl Into<String>,
        message: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            timestamp: chrono::Utc::now().timestamp(),
            message: Some(message.into()),
            error,
            ..Self::default()
        }
    }

    /// Build a reply from a worker's structured result value, stamping the
    /// request id and timestamp. Unknown result keys land in `extra`.
    pub fn from_result(request_id: &str, result: &Value) -> Self {
        let mut fields = result.as_object().cloned().unwrap_or_default();
        fields.insert("request_id".into(), Value::String(request_id.to_string()));
        fields.insert(
            "timestamp".into(),
            Value::from(chrono::Utc::now().timestamp()),
        );
        // The worker's user_id is pipeline plumbing, not a reply field
        fields.remove("user_id");
        serde_json::from_value(Value::Object(fields)).unwrap_or_else(|e| {
            Self::failure(
                request_id,
                "Operation failed",
                Some(format!("malformed worker result: {e}")),
            )
        })
    }
}

/// Registry-side portion of a `get_state` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryState {
    pub current_version: Option<String>,
    pub timestamp: i64,
}

/// Coordinator-side portion of a `get_state` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceState {
    pub status: String,
    pub pid: u32,
    pub operation_in_progress: bool,
    pub current_operation: Option<String>,
    pub last_operation_type: Option<String>,
    pub last_updated: i64,
}

/// Pending-change hints in a `get_state` report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PendingChanges {
    pub filesystem_changes_pending: bool,
    pub registry_changes_pending: bool,
}

/// Full `get_state` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateReport {
    pub registry: RegistryState,
    pub governance: GovernanceState,
    pub changes: PendingChanges,
}
