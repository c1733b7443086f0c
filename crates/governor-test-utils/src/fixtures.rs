//! Entry and changeset builders for common test shapes

use governor_registry::{Entry, EntryId};
use serde_json::json;

/// Parse an entry id, panicking on malformed input (test-only).
pub fn id(raw: &str) -> EntryId {
    EntryId::parse(raw).expect("fixture id must be well-formed")
}

/// A bare entry with the given id and kind.
pub fn entry(raw_id: &str, kind: &str) -> Entry {
    Entry::new(id(raw_id), kind)
}

/// A `function.lua` entry carrying the given source.
pub fn lua_function(raw_id: &str, source: &str) -> Entry {
    entry(raw_id, "function.lua").with_data("source", source)
}

/// A `registry.entry` refined by `meta.type`.
pub fn typed_entry(raw_id: &str, meta_type: &str) -> Entry {
    entry(raw_id, "registry.entry").with_meta("type", meta_type)
}

/// A processor registration entry with the given priority.
pub fn processor_entry(raw_id: &str, priority: i64) -> Entry {
    entry(raw_id, "registry.entry")
        .with_meta("type", "registry.processor")
        .with_meta("priority", json!(priority))
}

/// A listener registration entry with the given priority.
pub fn listener_entry(raw_id: &str, priority: i64) -> Entry {
    entry(raw_id, "registry.entry")
        .with_meta("type", "registry.listener")
        .with_meta("priority", json!(priority))
}
