//! Change operations and changesets
//!
//! A changeset is the ordered sequence of `entry.create` / `entry.update` /
//! `entry.delete` operations that the registry applies atomically. This
//! module also carries the raw-operation screening used before a changeset
//! enters the pipeline, and the minimal-delta construction used by the
//! uploader.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::{Entry, EntryId};

/// Discriminant of a change operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Insert a new entry
    #[serde(rename = "entry.create")]
    Create,
    /// Replace an existing entry
    #[serde(rename = "entry.update")]
    Update,
    /// Remove an entry; only the id is required
    #[serde(rename = "entry.delete")]
    Delete,
}

impl ChangeKind {
    /// Parse the wire form (`entry.create` etc.).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "entry.create" => Some(Self::Create),
            "entry.update" => Some(Self::Update),
            "entry.delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Wire form of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "entry.create",
            Self::Update => "entry.update",
            Self::Delete => "entry.delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tagged change operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOp {
    /// Operation discriminant
    pub kind: ChangeKind,
    /// Affected entry; for deletes only `entry.id` is meaningful
    pub entry: Entry,
}

impl ChangeOp {
    /// Create-operation for a full entry.
    pub fn create(entry: Entry) -> Self {
        Self {
            kind: ChangeKind::Create,
            entry,
        }
    }

    /// Update-operation for a full entry.
    pub fn update(entry: Entry) -> Self {
        Self {
            kind: ChangeKind::Update,
            entry,
        }
    }

    /// Delete-operation carrying only the id.
    pub fn delete(id: EntryId) -> Self {
        Self {
            kind: ChangeKind::Delete,
            entry: Entry::id_only(id),
        }
    }
}

/// Per-kind operation counts for a changeset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

impl ChangeStats {
    /// Total number of operations counted.
    pub fn total(&self) -> usize {
        self.create + self.update + self.delete
    }
}

/// Ordered sequence of change operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Changeset(Vec<ChangeOp>);

impl Changeset {
    /// Empty changeset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an operation list.
    pub fn from_ops(ops: Vec<ChangeOp>) -> Self {
        Self(ops)
    }

    /// The operations, in order.
    pub fn ops(&self) -> &[ChangeOp] {
        &self.0
    }

    /// Mutable access to the operations, for transforming processors.
    pub fn ops_mut(&mut self) -> &mut [ChangeOp] {
        &mut self.0
    }

    /// Consume into the operation list.
    pub fn into_ops(self) -> Vec<ChangeOp> {
        self.0
    }

    /// Append an operation.
    pub fn push(&mut self, op: ChangeOp) {
        self.0.push(op);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChangeOp> {
        self.0.iter()
    }

    /// Count operations per kind.
    pub fn stats(&self) -> ChangeStats {
        let mut stats = ChangeStats::default();
        for op in &self.0 {
            match op.kind {
                ChangeKind::Create => stats.create += 1,
                ChangeKind::Update => stats.update += 1,
                ChangeKind::Delete => stats.delete += 1,
            }
        }
        stats
    }
}

impl IntoIterator for Changeset {
    type Item = ChangeOp;
    type IntoIter = std::vec::IntoIter<ChangeOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<ChangeOp> for Changeset {
    fn from_iter<I: IntoIterator<Item = ChangeOp>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Incremental changeset builder exposing an `ops()` accessor.
///
/// Callers hand this to the client API, which extracts the raw operation
/// list rather than requiring a finished [`Changeset`].
#[derive(Debug, Default)]
pub struct ChangesetBuilder {
    ops: Vec<ChangeOp>,
}

impl ChangesetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a create for the entry.
    pub fn create(mut self, entry: Entry) -> Self {
        self.ops.push(ChangeOp::create(entry));
        self
    }

    /// Queue an update for the entry.
    pub fn update(mut self, entry: Entry) -> Self {
        self.ops.push(ChangeOp::update(entry));
        self
    }

    /// Queue a delete for the id.
    pub fn delete(mut self, id: EntryId) -> Self {
        self.ops.push(ChangeOp::delete(id));
        self
    }

    /// The queued operations, in order.
    pub fn ops(&self) -> &[ChangeOp] {
        &self.ops
    }

    /// Finish into a changeset.
    pub fn build(self) -> Changeset {
        Changeset(self.ops)
    }
}

impl From<ChangesetBuilder> for Changeset {
    fn from(builder: ChangesetBuilder) -> Self {
        builder.build()
    }
}

/// A shape problem found while screening a raw operation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeIssue {
    /// Position of the item in the submitted list
    pub index: usize,
    /// Entry id, when one could be read from the item
    pub id: Option<String>,
    /// What is wrong with the item
    pub message: String,
}

/// Screen a raw operation list into well-formed operations plus issues.
///
/// Ill-formed items (missing `kind`/`entry`, unrecognized `kind`, delete
/// without an id, unparseable id) are reported individually; the remaining
/// items survive as a changeset. Callers decide whether partial salvage is
/// acceptable.
pub fn screen_raw_ops(raw: &[Value]) -> (Changeset, Vec<ShapeIssue>) {
    let mut ops = Vec::new();
    let mut issues = Vec::new();

    for (index, item) in raw.iter().enumerate() {
        let Some(object) = item.as_object() else {
            issues.push(ShapeIssue {
                index,
                id: None,
                message: "operation is not an object".to_string(),
            });
            continue;
        };

        let raw_id = object
            .get("entry")
            .and_then(|e| e.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(kind_str) = object.get("kind").and_then(Value::as_str) else {
            issues.push(ShapeIssue {
                index,
                id: raw_id,
                message: "operation is missing 'kind'".to_string(),
            });
            continue;
        };
        let Some(kind) = ChangeKind::parse(kind_str) else {
            issues.push(ShapeIssue {
                index,
                id: raw_id,
                message: format!("unrecognized operation kind: {kind_str}"),
            });
            continue;
        };

        let Some(entry_value) = object.get("entry") else {
            issues.push(ShapeIssue {
                index,
                id: None,
                message: "operation is missing 'entry'".to_string(),
            });
            continue;
        };

        if kind == ChangeKind::Delete
            && entry_value.get("id").and_then(Value::as_str).is_none()
        {
            issues.push(ShapeIssue {
                index,
                id: None,
                message: "delete operation is missing 'entry.id'".to_string(),
            });
            continue;
        }

        match serde_json::from_value::<Entry>(entry_value.clone()) {
            Ok(entry) => ops.push(ChangeOp { kind, entry }),
            Err(e) => issues.push(ShapeIssue {
                index,
                id: raw_id,
                message: format!("invalid entry: {e}"),
            }),
        }
    }

    (Changeset(ops), issues)
}

/// Build the minimal changeset transforming `current` into `target`.
///
/// Creates for ids present only in `target`, deletes for ids present only
/// in `current`, updates where content differs. Operations are ordered by
/// id within each group (creates, updates, deletes) so the result is
/// deterministic.
pub fn build_delta(current: &[Entry], target: &[Entry]) -> Changeset {
    let current_by_id: BTreeMap<&EntryId, &Entry> =
        current.iter().map(|e| (&e.id, e)).collect();
    let target_by_id: BTreeMap<&EntryId, &Entry> = target.iter().map(|e| (&e.id, e)).collect();

    let mut creates = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();

    for (id, entry) in &target_by_id {
        match current_by_id.get(id) {
            None => creates.push(ChangeOp::create((*entry).clone())),
            Some(existing) if !existing.content_eq(entry) => {
                updates.push(ChangeOp::update((*entry).clone()));
            }
            Some(_) => {}
        }
    }
    for id in current_by_id.keys() {
        if !target_by_id.contains_key(*id) {
            deletes.push(ChangeOp::delete((*id).clone()));
        }
    }

    let mut ops = creates;
    ops.append(&mut updates);
    ops.append(&mut deletes);
    Changeset(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entry(id: &str, kind: &str) -> Entry {
        Entry::new(EntryId::parse(id).unwrap(), kind)
    }

    #[test]
    fn test_change_kind_wire_form() {
        assert_eq!(ChangeKind::parse("entry.create"), Some(ChangeKind::Create));
        assert_eq!(ChangeKind::parse("entry.rename"), None);
        assert_eq!(ChangeKind::Delete.as_str(), "entry.delete");
    }

    #[test]
    fn test_changeset_stats() {
        let changeset = ChangesetBuilder::new()
            .create(entry("a:x", "registry.entry"))
            .update(entry("a:y", "registry.entry"))
            .delete(EntryId::parse("a:z").unwrap())
            .build();
        let stats = changeset.stats();
        assert_eq!(stats.create, 1);
        assert_eq!(stats.update, 1);
        assert_eq!(stats.delete, 1);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_changeset_serde_wire_shape() {
        let changeset = ChangesetBuilder::new()
            .delete(EntryId::parse("a:z").unwrap())
            .build();
        let value = serde_json::to_value(&changeset).unwrap();
        assert_eq!(value[0]["kind"], "entry.delete");
        assert_eq!(value[0]["entry"]["id"], "a:z");
    }

    #[test]
    fn test_screen_accepts_well_formed_ops() {
        let raw = vec![
            json!({"kind": "entry.create", "entry": {"id": "a:x", "kind": "registry.entry"}}),
            json!({"kind": "entry.delete", "entry": {"id": "a:y"}}),
        ];
        let (changeset, issues) = screen_raw_ops(&raw);
        assert!(issues.is_empty());
        assert_eq!(changeset.len(), 2);
        assert_eq!(changeset.ops()[1].kind, ChangeKind::Delete);
    }

    #[test]
    fn test_screen_reports_bad_items_but_salvages_rest() {
        let raw = vec![
            json!({"entry": {"id": "a:x"}}),
            json!({"kind": "entry.rename", "entry": {"id": "a:x"}}),
            json!({"kind": "entry.delete", "entry": {}}),
            json!({"kind": "entry.create", "entry": {"id": "a:ok", "kind": "registry.entry"}}),
        ];
        let (changeset, issues) = screen_raw_ops(&raw);
        assert_eq!(issues.len(), 3);
        assert_eq!(changeset.len(), 1);
        assert_eq!(changeset.ops()[0].entry.id.to_string(), "a:ok");
        assert!(issues[0].message.contains("missing 'kind'"));
        assert!(issues[1].message.contains("unrecognized"));
        assert!(issues[2].message.contains("missing 'entry.id'"));
    }

    #[test]
    fn test_screen_non_object_item() {
        let (changeset, issues) = screen_raw_ops(&[json!("not an op")]);
        assert!(changeset.is_empty());
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_build_delta_empty_to_target_is_all_creates() {
        let target = vec![entry("a:x", "registry.entry"), entry("a:y", "registry.entry")];
        let delta = build_delta(&[], &target);
        assert_eq!(delta.stats().create, 2);
        assert_eq!(delta.stats().total(), 2);
    }

    #[test]
    fn test_build_delta_detects_update_and_delete() {
        let current = vec![
            entry("a:x", "function.lua").with_data("source", "return 1"),
            entry("a:gone", "registry.entry"),
        ];
        let target = vec![entry("a:x", "function.lua").with_data("source", "return 2")];
        let delta = build_delta(&current, &target);
        let stats = delta.stats();
        assert_eq!((stats.create, stats.update, stats.delete), (0, 1, 1));
    }

    #[test]
    fn test_build_delta_identical_sets_is_empty() {
        let entries = vec![entry("a:x", "registry.entry").with_data("port", 8080)];
        let delta = build_delta(&entries, &entries);
        assert!(delta.is_empty());
    }
}
