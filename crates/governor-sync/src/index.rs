//! Namespace index codec
//!
//! Every non-empty namespace directory carries an `_index.yaml` describing
//! its entries: a short header, the literal `entries:` line, then one list
//! element per entry prefixed with a `# <namespace>:<name>` comment and
//! separated by blank lines. Mapping keys emit in a fixed priority order
//! (see [`SyncPolicy`]) at every nesting level; unlisted keys follow
//! alphabetically.
//!
//! On-disk entries are flattened: `name`, `kind` and `meta` are reserved
//! keys, all remaining keys are the entry's `data` fields. The parser
//! reverses the flattening.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::warn;

use governor_registry::{Entry, EntryId, Fields};

use crate::policy::SyncPolicy;
use crate::{Error, Result};

/// File name of the per-namespace index.
pub const INDEX_FILE_NAME: &str = "_index.yaml";

/// Reserved top-level keys in an on-disk entry mapping.
const RESERVED_KEYS: &[&str] = &["name", "kind", "meta"];

/// Parsed form of an `_index.yaml` document.
#[derive(Debug, Default)]
pub struct IndexDoc {
    pub version: Option<String>,
    pub namespace: Option<String>,
    pub meta: Option<Fields>,
    pub entries: Vec<Fields>,
}

/// Flatten an entry into its on-disk index mapping.
pub fn entry_to_index_fields(entry: &Entry) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".into(), Value::String(entry.id.name().to_string()));
    if !entry.kind.is_empty() {
        fields.insert("kind".into(), Value::String(entry.kind.clone()));
    }
    if !entry.meta.is_empty() {
        fields.insert("meta".into(), Value::Object(entry.meta.clone()));
    }
    for (key, value) in &entry.data {
        if RESERVED_KEYS.contains(&key.as_str()) {
            warn!(entry = %entry.id, key = %key, "data field shadows a reserved index key, skipping");
            continue;
        }
        fields.insert(key.clone(), value.clone());
    }
    fields
}

/// Rebuild an entry from its on-disk index mapping.
pub fn index_fields_to_entry(namespace: &str, fields: &Fields) -> Result<Entry> {
    let name = fields
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidIndexEntry {
            namespace: namespace.to_string(),
            message: "entry is missing 'name'".to_string(),
        })?;
    let id = EntryId::new(namespace, name)?;

    let kind = fields
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut entry = Entry::new(id, kind);

    if let Some(meta) = fields.get("meta") {
        entry.meta = meta
            .as_object()
            .cloned()
            .ok_or_else(|| Error::InvalidIndexEntry {
                namespace: namespace.to_string(),
                message: format!("'meta' of entry '{name}' is not a mapping"),
            })?;
    }
    for (key, value) in fields {
        if !RESERVED_KEYS.contains(&key.as_str()) {
            entry.data.insert(key.clone(), value.clone());
        }
    }
    Ok(entry)
}

/// Render the full index document for a namespace.
///
/// Entries are sorted by name; the caller passes them in any order.
pub fn render_index(
    namespace: &str,
    entries: &[Entry],
    meta: Option<&Fields>,
    policy: &SyncPolicy,
) -> String {
    let mut out = String::new();
    out.push_str("version: \"1.0\"\n");
    out.push_str(&format!(
        "namespace: {}\n",
        render_scalar(&Value::String(namespace.to_string()))
    ));
    if let Some(meta) = meta
        && !meta.is_empty()
    {
        out.push_str("meta:\n");
        render_mapping(&mut out, meta, 2, policy);
    }
    out.push('\n');
    out.push_str("entries:\n");

    let mut sorted: Vec<&Entry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.id.name().cmp(b.id.name()));

    for entry in sorted {
        out.push('\n');
        out.push_str(&format!("  # {}\n", entry.id));
        let fields = entry_to_index_fields(entry);
        render_list_item(&mut out, &fields, 2, policy);
    }
    out
}

/// Parse an index document.
pub fn parse_index(content: &str, path: &Path) -> Result<IndexDoc> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| Error::IndexParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    let value = serde_json::to_value(&yaml).map_err(|e| Error::IndexParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let Some(object) = value.as_object() else {
        return Err(Error::IndexParse {
            path: path.to_path_buf(),
            message: "index document is not a mapping".to_string(),
        });
    };

    let mut doc = IndexDoc {
        version: object
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string),
        namespace: object
            .get("namespace")
            .and_then(Value::as_str)
            .map(str::to_string),
        meta: object.get("meta").and_then(Value::as_object).cloned(),
        entries: Vec::new(),
    };

    if let Some(entries) = object.get("entries") {
        let Some(list) = entries.as_array() else {
            return Err(Error::IndexParse {
                path: path.to_path_buf(),
                message: "'entries' is not a list".to_string(),
            });
        };
        for (i, item) in list.iter().enumerate() {
            match item.as_object() {
                Some(fields) => doc.entries.push(fields.clone()),
                None => {
                    return Err(Error::IndexParse {
                        path: path.to_path_buf(),
                        message: format!("entry {i} is not a mapping"),
                    });
                }
            }
        }
    }
    Ok(doc)
}

fn sorted_keys<'a>(map: &'a Map<String, Value>, policy: &SyncPolicy) -> Vec<&'a String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort_by_key(|k| policy.field_rank(k));
    keys
}

/// Render one `key: value` line (or block) at the given indent.
fn render_field(out: &mut String, key: &str, value: &Value, indent: usize, policy: &SyncPolicy) {
    let pad = " ".repeat(indent);
    let key = render_key(key);
    match value {
        Value::Object(map) if map.is_empty() => out.push_str(&format!("{pad}{key}: {{}}\n")),
        Value::Object(map) => {
            out.push_str(&format!("{pad}{key}:\n"));
            render_mapping(out, map, indent + 2, policy);
        }
        Value::Array(items) if items.is_empty() => out.push_str(&format!("{pad}{key}: []\n")),
        Value::Array(items) => {
            out.push_str(&format!("{pad}{key}:\n"));
            for item in items {
                match item {
                    Value::Object(map) if !map.is_empty() => {
                        render_list_item(out, map, indent + 2, policy);
                    }
                    _ => {
                        out.push_str(&format!("{}- {}\n", " ".repeat(indent + 2), render_scalar(item)));
                    }
                }
            }
        }
        Value::String(s) if s.contains('\n') => {
            render_block_scalar(out, &key, s, indent);
        }
        _ => out.push_str(&format!("{pad}{key}: {}\n", render_scalar(value))),
    }
}

/// Render a mapping block, one field per line, keys in policy order.
fn render_mapping(out: &mut String, map: &Map<String, Value>, indent: usize, policy: &SyncPolicy) {
    for key in sorted_keys(map, policy) {
        render_field(out, key, &map[key], indent, policy);
    }
}

/// Render a mapping as a `- ` list item: first field on the dash line,
/// remaining fields two spaces deeper.
fn render_list_item(out: &mut String, map: &Map<String, Value>, indent: usize, policy: &SyncPolicy) {
    let keys = sorted_keys(map, policy);
    if keys.is_empty() {
        out.push_str(&format!("{}- {{}}\n", " ".repeat(indent)));
        return;
    }
    let mut first = true;
    for key in keys {
        if first {
            let mut line = String::new();
            render_field(&mut line, key, &map[key], 0, policy);
            out.push_str(&format!("{}- ", " ".repeat(indent)));
            // Re-indent continuation lines of the first field under the dash
            for (i, part) in line.lines().enumerate() {
                if i == 0 {
                    out.push_str(part);
                    out.push('\n');
                } else {
                    out.push_str(&format!("{}{}\n", " ".repeat(indent + 2), part));
                }
            }
            first = false;
        } else {
            render_field(out, key, &map[key], indent + 2, policy);
        }
    }
}

fn render_block_scalar(out: &mut String, key: &str, text: &str, indent: usize) {
    let pad = " ".repeat(indent);
    let marker = if text.ends_with('\n') { "|" } else { "|-" };
    out.push_str(&format!("{pad}{key}: {marker}\n"));
    let inner = " ".repeat(indent + 2);
    for line in text.trim_end_matches('\n').split('\n') {
        if line.is_empty() {
            out.push('\n');
        } else {
            out.push_str(&format!("{inner}{line}\n"));
        }
    }
}

fn render_key(key: &str) -> String {
    let plain = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if plain {
        key.to_string()
    } else {
        render_scalar(&Value::String(key.to_string()))
    }
}

/// Render a scalar on a single line, quoting when YAML would reinterpret.
fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if s.contains('\n') => {
            // Double-quoted JSON escaping is valid YAML and keeps the
            // scalar on one line; block scalars are only used for fields
            serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"))
        }
        Value::String(s) => {
            // serde_yaml decides quoting; single-line strings never come
            // back as block scalars
            serde_yaml::to_string(s)
                .map(|r| r.trim_end().to_string())
                .unwrap_or_else(|_| format!("{s:?}"))
        }
        other => serde_yaml::to_string(other)
            .map(|r| r.trim_end().to_string())
            .unwrap_or_default(),
    }
}
