//! Uploader: source tree → registry changeset
//!
//! Diffs the on-disk representation against a live snapshot and emits the
//! minimal changeset, together with per-kind counts and a display form of
//! each operation. The uploader never applies anything itself; the
//! coordinator chains the produced changeset into the change pipeline.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use governor_registry::{ChangeStats, Changeset, Registry};

use crate::loader;
use crate::policy::SyncPolicy;
use crate::Result;

/// Source fields longer than this render as a placeholder in formatted
/// changesets.
pub const SOURCE_DISPLAY_LIMIT: usize = 1000;

/// Result of a full upload scan.
#[derive(Debug, Serialize)]
pub struct UploadReport {
    pub success: bool,
    pub message: String,
    pub changeset: Changeset,
    pub count: usize,
    pub stats: ChangeStats,
    pub formatted_changeset: Vec<Value>,
}

/// Result of a `check_only` scan: no applicable changeset is produced.
#[derive(Debug, Serialize)]
pub struct UploadCheck {
    pub success: bool,
    pub has_changes: bool,
    pub count: usize,
    pub changes: Vec<Value>,
}

/// Diffs a source tree against the live registry.
pub struct Uploader<'a> {
    registry: &'a dyn Registry,
    policy: &'a SyncPolicy,
}

impl<'a> Uploader<'a> {
    pub fn new(registry: &'a dyn Registry, policy: &'a SyncPolicy) -> Self {
        Self { registry, policy }
    }

    /// Scan the source tree and produce the changeset to apply.
    pub fn upload(&self, directory: &Path) -> Result<UploadReport> {
        let changeset = self.delta(directory)?;
        let stats = changeset.stats();
        let count = changeset.len();
        let formatted_changeset = format_changeset(&changeset);

        let message = if count == 0 {
            "No changes detected".to_string()
        } else {
            format!(
                "Found {} changes ({} create, {} update, {} delete)",
                count, stats.create, stats.update, stats.delete
            )
        };
        debug!(count, "upload scan complete");

        Ok(UploadReport {
            success: true,
            message,
            changeset,
            count,
            stats,
            formatted_changeset,
        })
    }

    /// Scan without producing an applicable changeset.
    pub fn check(&self, directory: &Path) -> Result<UploadCheck> {
        let changeset = self.delta(directory)?;
        let count = changeset.len();
        Ok(UploadCheck {
            success: true,
            has_changes: count > 0,
            count,
            changes: format_changeset(&changeset),
        })
    }

    fn delta(&self, directory: &Path) -> Result<Changeset> {
        let snapshot = self.registry.snapshot()?;
        let current = snapshot.entries();
        let target = loader::load_tree(directory, self.policy)?;
        Ok(self.registry.build_delta(&current, &target))
    }
}

/// Display form of a changeset: each operation serialized with oversized
/// source fields replaced by a placeholder.
pub fn format_changeset(changeset: &Changeset) -> Vec<Value> {
    changeset
        .iter()
        .map(|op| {
            let mut value = serde_json::to_value(op).unwrap_or(Value::Null);
            let source_len = value
                .pointer("/entry/data/source")
                .and_then(Value::as_str)
                .map(str::len);
            if let Some(len) = source_len
                && len > SOURCE_DISPLAY_LIMIT
                && let Some(data) = value
                    .pointer_mut("/entry/data")
                    .and_then(Value::as_object_mut)
            {
                data.insert(
                    "source".to_string(),
                    Value::String(format!("<source: {len} bytes>")),
                );
            }
            value
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor_registry::{ChangeOp, Entry, EntryId};
    use governor_test_utils::{fixtures, MemoryRegistry};
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_upload_empty_tree_against_empty_registry() {
        let registry = MemoryRegistry::new();
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();

        let report = Uploader::new(&registry, &policy).upload(dir.path()).unwrap();
        assert!(report.success);
        assert_eq!(report.count, 0);
        assert_eq!(report.message, "No changes detected");
    }

    #[test]
    fn test_upload_detects_creates() {
        let registry = MemoryRegistry::new();
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("app/_index.yaml"),
            "entries:\n  - name: api\n    kind: registry.entry\n    port: 8080\n",
        );

        let report = Uploader::new(&registry, &policy).upload(dir.path()).unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.stats.create, 1);
        assert_eq!(
            report.changeset.ops()[0].entry.id,
            EntryId::parse("app:api").unwrap()
        );
    }

    #[test]
    fn test_upload_detects_delete_of_removed_entry() {
        let registry =
            MemoryRegistry::with_entries([fixtures::entry("app:old", "registry.entry")]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();

        let report = Uploader::new(&registry, &policy).upload(dir.path()).unwrap();
        assert_eq!(report.stats.delete, 1);
    }

    #[test]
    fn test_check_only_reports_without_changeset() {
        let registry = MemoryRegistry::new();
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("app/_index.yaml"),
            "entries:\n  - name: api\n    kind: registry.entry\n",
        );

        let check = Uploader::new(&registry, &policy).check(dir.path()).unwrap();
        assert!(check.has_changes);
        assert_eq!(check.count, 1);
        assert_eq!(check.changes.len(), 1);
    }

    #[test]
    fn test_format_truncates_long_source() {
        let long_source = "x".repeat(SOURCE_DISPLAY_LIMIT + 1);
        let entry = Entry::new(EntryId::parse("a:x").unwrap(), "function.lua")
            .with_data("source", long_source.clone());
        let changeset = Changeset::from_ops(vec![ChangeOp::create(entry)]);

        let formatted = format_changeset(&changeset);
        let shown = formatted[0]["entry"]["data"]["source"].as_str().unwrap();
        assert_eq!(shown, format!("<source: {} bytes>", long_source.len()));
    }

    #[test]
    fn test_format_keeps_short_source() {
        let entry = fixtures::lua_function("a:x", "return 1");
        let changeset = Changeset::from_ops(vec![ChangeOp::create(entry)]);
        let formatted = format_changeset(&changeset);
        assert_eq!(formatted[0]["entry"]["data"]["source"], "return 1");
    }
}
