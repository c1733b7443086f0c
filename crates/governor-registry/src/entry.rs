//! Registry entry model
//!
//! An entry is a single registry record identified by `<namespace>:<name>`,
//! typed by `kind` and optionally refined by `meta.type`. The `meta` and
//! `data` mappings are open JSON objects whose schemas belong to the kind,
//! not to this crate.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Open string→value mapping used for entry `meta` and `data`.
pub type Fields = Map<String, Value>;

/// Identifier of a registry entry: `<namespace>:<name>`.
///
/// The namespace is a dotted identifier (`a.b.c`). Namespace components must
/// not be empty and must not contain `/`, `:` or further dots, because the
/// filesystem form maps each component to a directory. Entry names may
/// contain dots (e.g. a name that already carries a file extension) but not
/// `/` or `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId {
    namespace: String,
    name: String,
}

impl EntryId {
    /// Create an id from namespace and name, validating both.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        let raw = format!("{namespace}:{name}");

        if namespace.is_empty() {
            return Err(Error::invalid_id(&raw, "namespace is empty"));
        }
        for component in namespace.split('.') {
            if component.is_empty() {
                return Err(Error::invalid_id(&raw, "namespace has an empty component"));
            }
            if component.contains(['/', ':']) {
                return Err(Error::invalid_id(
                    &raw,
                    "namespace components must not contain '/' or ':'",
                ));
            }
        }
        if name.is_empty() {
            return Err(Error::invalid_id(&raw, "name is empty"));
        }
        if name.contains(['/', ':']) {
            return Err(Error::invalid_id(&raw, "name must not contain '/' or ':'"));
        }

        Ok(Self { namespace, name })
    }

    /// Parse an id in `<namespace>:<name>` form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(':') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Err(Error::invalid_id(raw, "missing ':' separator")),
        }
    }

    /// Dotted namespace prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Entry name within the namespace.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}

/// A single registry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique id in `<namespace>:<name>` form
    pub id: EntryId,
    /// Kind discriminant (e.g. `function.lua`, `registry.entry`)
    #[serde(default)]
    pub kind: String,
    /// Open metadata mapping; `meta.type` refines per-entry behavior
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Fields,
    /// Per-kind payload mapping; may carry a `source` string
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Fields,
}

impl Entry {
    /// Create an entry with empty `meta` and `data`.
    pub fn new(id: EntryId, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            meta: Fields::new(),
            data: Fields::new(),
        }
    }

    /// Create a bare entry carrying only an id, as used by delete operations.
    pub fn id_only(id: EntryId) -> Self {
        Self::new(id, "")
    }

    /// Set a `meta` field (builder style).
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Set a `data` field (builder style).
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// The finer `meta.type` discriminant, if present.
    pub fn meta_type(&self) -> Option<&str> {
        self.meta.get("type").and_then(Value::as_str)
    }

    /// Read a string-valued `data` field.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// Replace a `data` field with a string value.
    pub fn set_data_str(&mut self, field: &str, value: impl Into<String>) {
        self.data
            .insert(field.to_string(), Value::String(value.into()));
    }

    /// Whether two entries carry the same kind, meta and data.
    ///
    /// Used by delta construction; the id is compared separately.
    pub fn content_eq(&self, other: &Entry) -> bool {
        self.kind == other.kind && self.meta == other.meta && self.data == other.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_valid_id() {
        let id = EntryId::parse("app.services:api").unwrap();
        assert_eq!(id.namespace(), "app.services");
        assert_eq!(id.name(), "api");
        assert_eq!(id.to_string(), "app.services:api");
    }

    #[test]
    fn test_parse_name_with_dots() {
        let id = EntryId::parse("a.b:handler.lua").unwrap();
        assert_eq!(id.name(), "handler.lua");
    }

    #[test]
    fn test_parse_missing_separator() {
        assert!(EntryId::parse("no-separator").is_err());
    }

    #[test]
    fn test_parse_empty_namespace_component() {
        assert!(EntryId::parse("a..b:x").is_err());
        assert!(EntryId::parse(":x").is_err());
    }

    #[test]
    fn test_parse_rejects_path_separators() {
        assert!(EntryId::parse("a/b:x").is_err());
        assert!(EntryId::parse("a.b:x/y").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_name() {
        assert!(EntryId::parse("a.b:").is_err());
    }

    #[test]
    fn test_id_serde_roundtrip() {
        let id = EntryId::parse("a.b:x").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"a.b:x\"");
        let back: EntryId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_entry_meta_type() {
        let entry = Entry::new(EntryId::parse("a:x").unwrap(), "registry.entry")
            .with_meta("type", "view.page");
        assert_eq!(entry.meta_type(), Some("view.page"));
    }

    #[test]
    fn test_entry_content_eq_ignores_id() {
        let a = Entry::new(EntryId::parse("a:x").unwrap(), "function.lua")
            .with_data("source", "return 1");
        let b = Entry::new(EntryId::parse("a:y").unwrap(), "function.lua")
            .with_data("source", "return 1");
        assert!(a.content_eq(&b));

        let c = Entry::new(EntryId::parse("a:x").unwrap(), "function.lua")
            .with_data("source", "return 2");
        assert!(!a.content_eq(&c));
    }

    #[test]
    fn test_entry_deserializes_without_kind() {
        let entry: Entry = serde_json::from_value(serde_json::json!({"id": "a:x"})).unwrap();
        assert_eq!(entry.kind, "");
        assert!(entry.meta.is_empty());
    }
}
