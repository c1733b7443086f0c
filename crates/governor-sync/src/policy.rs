//! Materialization policy
//!
//! The downloader externalizes source-bearing fields as side files. Which
//! kinds carry such a field, which field it is and which file extension it
//! gets, plus the key ordering used when emitting index files, are policy
//! rather than mechanism: the built-in table below can be replaced by a
//! TOML policy file loaded at startup.

use serde::Deserialize;

use governor_registry::Entry;

use crate::{Error, Result};

/// Maps an entry kind (optionally refined by `meta.type`) to the data field
/// holding its source text and the extension of the side file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MaterializeRule {
    /// Entry kind this rule applies to
    pub kind: String,
    /// Finer `meta.type` discriminant; `None` matches any
    #[serde(default)]
    pub meta_type: Option<String>,
    /// Data field holding the source text
    pub source_field: String,
    /// Side-file extension, including the leading dot
    pub extension: String,
}

impl MaterializeRule {
    fn matches(&self, entry: &Entry) -> bool {
        if self.kind != entry.kind {
            return false;
        }
        match &self.meta_type {
            Some(meta_type) => entry.meta_type() == Some(meta_type.as_str()),
            None => true,
        }
    }
}

/// Key priority used when emitting index-file mappings. Keys not listed
/// emit after the listed ones, in alphabetical order.
const FIELD_ORDER: &[&str] = &[
    "version",
    "namespace",
    "name",
    "kind",
    "contract",
    "meta",
    "type",
    "title",
    "comment",
    "group",
    "tags",
    "icon",
    "description",
    "order",
    "content_type",
    "prompt",
    "model",
    "temperature",
    "max_tokens",
    "tools",
    "memory",
    "delegate",
    "source",
    "modules",
    "imports",
    "method",
    "depends_on",
    "router",
    "set",
    "resources",
    "entries",
];

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    rules: Vec<MaterializeRule>,
    #[serde(default)]
    field_order: Option<Vec<String>>,
}

/// Materialization rules plus index-file field ordering.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    rules: Vec<MaterializeRule>,
    field_order: Vec<String>,
}

impl SyncPolicy {
    /// The built-in policy table.
    pub fn builtin() -> Self {
        let rule = |kind: &str, meta_type: Option<&str>, field: &str, ext: &str| MaterializeRule {
            kind: kind.to_string(),
            meta_type: meta_type.map(str::to_string),
            source_field: field.to_string(),
            extension: ext.to_string(),
        };
        Self {
            rules: vec![
                rule("function.lua", None, "source", ".lua"),
                rule("library.lua", None, "source", ".lua"),
                rule("process.lua", None, "source", ".lua"),
                rule("workflow.lua", None, "source", ".lua"),
                rule("template.jet", None, "source", ".jet"),
                rule("agent.gen1", None, "source", ".yml"),
                rule("registry.entry", Some("view.page"), "source", ".html"),
                rule("registry.entry", Some("view.template"), "source", ".html"),
            ],
            field_order: FIELD_ORDER.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Load a policy from a TOML document.
    ///
    /// The document lists `[[rules]]` tables and an optional `field_order`
    /// array; an omitted `field_order` keeps the built-in ordering.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: PolicyFile = toml::from_str(content).map_err(|e| Error::PolicyParse {
            message: e.to_string(),
        })?;
        let builtin = Self::builtin();
        Ok(Self {
            rules: if file.rules.is_empty() {
                builtin.rules
            } else {
                file.rules
            },
            field_order: file.field_order.unwrap_or(builtin.field_order),
        })
    }

    /// The rule applicable to an entry, if any.
    ///
    /// Rules refined by `meta.type` win over kind-only rules.
    pub fn rule_for(&self, entry: &Entry) -> Option<&MaterializeRule> {
        self.rules
            .iter()
            .filter(|r| r.matches(entry))
            .max_by_key(|r| r.meta_type.is_some())
    }

    /// Sort key for an index-file mapping key: listed keys rank by
    /// position, everything else ranks after them alphabetically.
    pub fn field_rank(&self, key: &str) -> (usize, String) {
        match self.field_order.iter().position(|k| k == key) {
            Some(position) => (position, String::new()),
            None => (self.field_order.len(), key.to_string()),
        }
    }

    /// Side-file name for an entry under a rule: the entry name plus the
    /// rule's extension, appended only when not already present.
    pub fn side_file_name(entry: &Entry, rule: &MaterializeRule) -> String {
        let name = entry.id.name();
        if name.ends_with(&rule.extension) {
            name.to_string()
        } else {
            format!("{}{}", name, rule.extension)
        }
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::builtin()
    }
}
