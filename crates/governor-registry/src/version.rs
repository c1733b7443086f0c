//! Registry version identifiers and history records

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque registry version id.
///
/// The governance layer never interprets version ids; it only compares them
/// for equality and threads them through replies and events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for VersionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One record in the registry's version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Version id
    pub id: VersionId,
    /// Unix seconds at which the version was created
    pub timestamp: i64,
    /// Optional commit message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_id_display_and_eq() {
        let a = VersionId::from("v7");
        assert_eq!(a.to_string(), "v7");
        assert_eq!(a, VersionId::new("v7"));
        assert_ne!(a, VersionId::new("v8"));
    }

    #[test]
    fn test_version_id_serde_transparent() {
        let id = VersionId::from("v3");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"v3\"");
    }
}
