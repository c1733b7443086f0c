//! Downloader: registry snapshot → directory tree
//!
//! Materializes the live snapshot to disk: one directory per namespace
//! (dots become path separators), an `_index.yaml` per non-empty namespace,
//! and a side file per source-bearing entry whose in-index reference
//! becomes `file://<name><ext>`. Writes are skipped when content already
//! matches, so a repeated download is a no-op. Orphan files and empty
//! namespace directories left behind by registry deletions are garbage
//! collected unless the caller opts out.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use governor_registry::{Entry, Registry};

use crate::index::{self, INDEX_FILE_NAME};
use crate::loader::FILE_SCHEME;
use crate::policy::SyncPolicy;
use crate::{fsutil, Error, Result};

/// Caller-supplied knobs for a download run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Remove unreferenced files and inactive namespace directories
    pub cleanup_orphaned: bool,
    /// Entries just removed from the registry; their side files are
    /// deleted even before the orphan scan runs
    pub deleted_entries: Vec<Entry>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            cleanup_orphaned: true,
            deleted_entries: Vec::new(),
        }
    }
}

impl DownloadOptions {
    /// Read the download knobs out of a raw options mapping.
    pub fn from_options(options: &Map<String, Value>) -> Self {
        let cleanup_orphaned = options
            .get("cleanup_orphaned")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let deleted_entries = options
            .get("deleted_entries")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            cleanup_orphaned,
            deleted_entries,
        }
    }
}

/// Counters reported by a download run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    pub namespaces: usize,
    pub entries: usize,
    pub files: usize,
    pub files_skipped: usize,
    pub deleted: usize,
    pub orphaned_files_removed: usize,
    pub empty_namespaces_removed: usize,
    pub index_files_removed: usize,
}

/// Materializes registry snapshots to a base directory.
pub struct Downloader<'a> {
    registry: &'a dyn Registry,
    policy: &'a SyncPolicy,
    base: PathBuf,
}

impl<'a> Downloader<'a> {
    pub fn new(registry: &'a dyn Registry, policy: &'a SyncPolicy, base: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            policy,
            base: base.into(),
        }
    }

    /// Materialize the current snapshot.
    pub fn download(&self, options: &DownloadOptions) -> Result<DownloadStats> {
        fs::create_dir_all(&self.base).map_err(|e| Error::io(&self.base, e))?;

        let snapshot = self.registry.snapshot()?;
        let mut by_namespace = group_by_namespace(snapshot.entries());

        let mut stats = DownloadStats::default();
        let mut written: HashSet<PathBuf> = HashSet::new();
        let mut referenced: BTreeMap<String, HashSet<String>> = BTreeMap::new();

        for (namespace, entries) in &mut by_namespace {
            stats.namespaces += 1;
            let dir = self.namespace_dir(namespace);
            entries.sort_by(|a, b| a.id.name().cmp(b.id.name()));

            for entry in entries.iter_mut() {
                stats.entries += 1;
                self.materialize_entry(
                    entry,
                    namespace,
                    &dir,
                    &mut stats,
                    &mut written,
                    &mut referenced,
                )?;
            }

            let content = index::render_index(namespace, entries, None, self.policy);
            let index_path = dir.join(INDEX_FILE_NAME);
            fsutil::write_if_changed(&index_path, content.as_bytes())?;
            written.insert(index_path);
        }

        for entry in &options.deleted_entries {
            self.remove_deleted_entry_file(entry, &mut stats);
        }

        if options.cleanup_orphaned {
            self.remove_orphaned_files(&written, &referenced, &mut stats)?;
            self.remove_empty_namespaces(&by_namespace, &mut stats)?;
        }

        debug!(?stats, base = %self.base.display(), "download complete");
        Ok(stats)
    }

    /// Scan for orphaned files without mutating anything.
    pub fn check_orphaned(&self) -> Result<Vec<PathBuf>> {
        if !self.base.is_dir() {
            return Ok(Vec::new());
        }
        let snapshot = self.registry.snapshot()?;
        let by_namespace = group_by_namespace(snapshot.entries());

        let mut referenced: BTreeMap<String, HashSet<String>> = BTreeMap::new();
        for (namespace, entries) in &by_namespace {
            for entry in entries {
                if let Some(file_name) = self.expected_side_file(entry) {
                    referenced
                        .entry(namespace.clone())
                        .or_default()
                        .insert(file_name);
                }
            }
        }

        let mut orphans = Vec::new();
        for dir in self.walk_directories()? {
            let namespace = self.namespace_of(&dir);
            for path in files_in(&dir)? {
                let file_name = file_name_of(&path);
                if file_name == INDEX_FILE_NAME {
                    continue;
                }
                let is_referenced = namespace
                    .as_ref()
                    .and_then(|ns| referenced.get(ns))
                    .is_some_and(|set| set.contains(&file_name));
                if !is_referenced {
                    orphans.push(path);
                }
            }
        }
        orphans.sort();
        Ok(orphans)
    }

    fn materialize_entry(
        &self,
        entry: &mut Entry,
        namespace: &str,
        dir: &Path,
        stats: &mut DownloadStats,
        written: &mut HashSet<PathBuf>,
        referenced: &mut BTreeMap<String, HashSet<String>>,
    ) -> Result<()> {
        let Some(rule) = self.policy.rule_for(entry) else {
            return Ok(());
        };
        let Some(value) = entry.data_str(&rule.source_field).map(str::to_string) else {
            return Ok(());
        };

        if let Some(file_name) = value.strip_prefix(FILE_SCHEME) {
            // Already externalized; nothing to write but the file is alive
            referenced
                .entry(namespace.to_string())
                .or_default()
                .insert(file_name.to_string());
            return Ok(());
        }

        let file_name = SyncPolicy::side_file_name(entry, rule);
        let path = dir.join(&file_name);
        if fsutil::write_if_changed(&path, value.as_bytes())? {
            stats.files += 1;
        } else {
            stats.files_skipped += 1;
        }
        written.insert(path);
        referenced
            .entry(namespace.to_string())
            .or_default()
            .insert(file_name.clone());

        let field = rule.source_field.clone();
        entry.set_data_str(&field, format!("{FILE_SCHEME}{file_name}"));
        Ok(())
    }

    fn remove_deleted_entry_file(&self, entry: &Entry, stats: &mut DownloadStats) {
        let Some(rule) = self.policy.rule_for(entry) else {
            return;
        };
        let file_name = entry
            .data_str(&rule.source_field)
            .and_then(|v| v.strip_prefix(FILE_SCHEME))
            .map(str::to_string)
            .unwrap_or_else(|| SyncPolicy::side_file_name(entry, rule));

        let path = self.namespace_dir(entry.id.namespace()).join(&file_name);
        if path.is_file() {
            match fs::remove_file(&path) {
                Ok(()) => stats.deleted += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove deleted entry file"),
            }
        }
    }

    fn remove_orphaned_files(
        &self,
        written: &HashSet<PathBuf>,
        referenced: &BTreeMap<String, HashSet<String>>,
        stats: &mut DownloadStats,
    ) -> Result<()> {
        for dir in self.walk_directories()? {
            let namespace = self.namespace_of(&dir);
            for path in files_in(&dir)? {
                let file_name = file_name_of(&path);
                if file_name == INDEX_FILE_NAME || written.contains(&path) {
                    continue;
                }
                let is_referenced = namespace
                    .as_ref()
                    .and_then(|ns| referenced.get(ns))
                    .is_some_and(|set| set.contains(&file_name));
                if !is_referenced {
                    fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
                    stats.orphaned_files_removed += 1;
                    debug!(path = %path.display(), "removed orphaned file");
                }
            }
        }
        Ok(())
    }

    fn remove_empty_namespaces(
        &self,
        by_namespace: &BTreeMap<String, Vec<Entry>>,
        stats: &mut DownloadStats,
    ) -> Result<()> {
        let active = active_namespaces(by_namespace);

        // Deepest directories first so nested empty namespaces collapse in
        // a single pass
        let mut dirs: Vec<PathBuf> = self
            .walk_directories()?
            .into_iter()
            .filter(|d| d != &self.base)
            .collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

        for dir in dirs {
            let Some(namespace) = self.namespace_of(&dir) else {
                continue;
            };
            if active.contains(&namespace) {
                continue;
            }

            let index_path = dir.join(INDEX_FILE_NAME);
            if index_path.is_file() {
                fs::remove_file(&index_path).map_err(|e| Error::io(&index_path, e))?;
                stats.index_files_removed += 1;
            }

            // Unexpected stragglers block removal; clear them and retry
            for path in files_in(&dir)? {
                warn!(path = %path.display(), "unexpected file in inactive namespace, removing");
                fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
                stats.orphaned_files_removed += 1;
            }

            let is_empty = fs::read_dir(&dir)
                .map_err(|e| Error::io(&dir, e))?
                .next()
                .is_none();
            if is_empty {
                fs::remove_dir(&dir).map_err(|e| Error::io(&dir, e))?;
                stats.empty_namespaces_removed += 1;
                debug!(path = %dir.display(), "removed empty namespace directory");
            }
        }
        Ok(())
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        let mut dir = self.base.clone();
        for component in namespace.split('.') {
            dir.push(component);
        }
        dir
    }

    fn namespace_of(&self, dir: &Path) -> Option<String> {
        let relative = dir.strip_prefix(&self.base).ok()?;
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if components.is_empty() {
            None
        } else {
            Some(components.join("."))
        }
    }

    fn expected_side_file(&self, entry: &Entry) -> Option<String> {
        let rule = self.policy.rule_for(entry)?;
        let value = entry.data_str(&rule.source_field)?;
        Some(match value.strip_prefix(FILE_SCHEME) {
            Some(file_name) => file_name.to_string(),
            None => SyncPolicy::side_file_name(entry, rule),
        })
    }

    fn walk_directories(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        collect_directories(&self.base, &mut dirs)?;
        dirs.sort();
        Ok(dirs)
    }
}

fn group_by_namespace(entries: Vec<Entry>) -> BTreeMap<String, Vec<Entry>> {
    let mut by_namespace: BTreeMap<String, Vec<Entry>> = BTreeMap::new();
    for entry in entries {
        by_namespace
            .entry(entry.id.namespace().to_string())
            .or_default()
            .push(entry);
    }
    by_namespace
}

/// A namespace is active when it holds at least one entry or is a proper
/// ancestor of an active namespace.
fn active_namespaces(by_namespace: &BTreeMap<String, Vec<Entry>>) -> HashSet<String> {
    let mut active = HashSet::new();
    for namespace in by_namespace.keys() {
        let components: Vec<&str> = namespace.split('.').collect();
        for depth in 1..=components.len() {
            active.insert(components[..depth].join("."));
        }
    }
    active
}

fn collect_directories(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    out.push(dir.to_path_buf());
    for child in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let child = child.map_err(|e| Error::io(dir, e))?;
        let path = child.path();
        if path.is_dir() {
            collect_directories(&path, out)?;
        }
    }
    Ok(())
}

fn files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for child in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let child = child.map_err(|e| Error::io(dir, e))?;
        let path = child.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor_test_utils::{fixtures, MemoryRegistry};
    use pretty_assertions::assert_eq;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_download_single_lua_entry() {
        let registry = MemoryRegistry::with_entries([fixtures::lua_function("a.b:x", "return 1")]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();

        let downloader = Downloader::new(&registry, &policy, dir.path());
        let stats = downloader.download(&DownloadOptions::default()).unwrap();

        assert_eq!(stats.namespaces, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.files, 1);
        assert_eq!(read(&dir.path().join("a/b/x.lua")), "return 1");
        let index = read(&dir.path().join("a/b/_index.yaml"));
        assert!(index.contains("source: file://x.lua"));
        assert!(index.contains("# a.b:x"));
    }

    #[test]
    fn test_download_is_idempotent() {
        let registry = MemoryRegistry::with_entries([
            fixtures::lua_function("a.b:x", "return 1"),
            fixtures::entry("a.b:svc", "registry.entry").with_data("port", 8080),
        ]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&registry, &policy, dir.path());

        let first = downloader.download(&DownloadOptions::default()).unwrap();
        assert_eq!(first.files, 1);

        let second = downloader.download(&DownloadOptions::default()).unwrap();
        assert_eq!(second.files, 0);
        assert_eq!(second.files_skipped, 1);
        assert_eq!(second.orphaned_files_removed, 0);
        assert_eq!(second.empty_namespaces_removed, 0);
    }

    #[test]
    fn test_download_removes_orphaned_files() {
        let registry = MemoryRegistry::with_entries([fixtures::lua_function("a:x", "return 1")]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&registry, &policy, dir.path());
        downloader.download(&DownloadOptions::default()).unwrap();

        fs::write(dir.path().join("a/stray.lua"), "orphan").unwrap();
        let stats = downloader.download(&DownloadOptions::default()).unwrap();
        assert_eq!(stats.orphaned_files_removed, 1);
        assert!(!dir.path().join("a/stray.lua").exists());
    }

    #[test]
    fn test_cleanup_can_be_disabled() {
        let registry = MemoryRegistry::with_entries([fixtures::lua_function("a:x", "return 1")]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&registry, &policy, dir.path());
        downloader.download(&DownloadOptions::default()).unwrap();

        fs::write(dir.path().join("a/stray.lua"), "orphan").unwrap();
        let options = DownloadOptions {
            cleanup_orphaned: false,
            ..DownloadOptions::default()
        };
        let stats = downloader.download(&options).unwrap();
        assert_eq!(stats.orphaned_files_removed, 0);
        assert!(dir.path().join("a/stray.lua").exists());
    }

    #[test]
    fn test_empty_namespaces_collapse() {
        let registry = MemoryRegistry::with_entries([fixtures::lua_function("a.b:x", "return 1")]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&registry, &policy, dir.path());
        downloader.download(&DownloadOptions::default()).unwrap();

        // Remove the entry; the namespace tree should collapse entirely
        let mut snapshot = registry.snapshot().unwrap();
        snapshot.delete(&fixtures::id("a.b:x")).unwrap();
        snapshot.commit().unwrap();

        let stats = downloader.download(&DownloadOptions::default()).unwrap();
        assert_eq!(stats.index_files_removed, 1);
        assert!(stats.empty_namespaces_removed >= 2);
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn test_deleted_entries_hint_removes_side_file() {
        let entry = fixtures::lua_function("a:x", "return 1");
        let registry = MemoryRegistry::with_entries([entry.clone()]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&registry, &policy, dir.path());
        downloader.download(&DownloadOptions::default()).unwrap();
        assert!(dir.path().join("a/x.lua").exists());

        let mut snapshot = registry.snapshot().unwrap();
        snapshot.delete(&fixtures::id("a:x")).unwrap();
        snapshot.commit().unwrap();

        let options = DownloadOptions {
            deleted_entries: vec![entry],
            ..DownloadOptions::default()
        };
        let stats = downloader.download(&options).unwrap();
        assert_eq!(stats.deleted, 1);
        assert!(!dir.path().join("a/x.lua").exists());
    }

    #[test]
    fn test_already_externalized_source_is_only_referenced() {
        let registry = MemoryRegistry::with_entries([
            fixtures::entry("a:x", "function.lua").with_data("source", "file://x.lua"),
        ]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&registry, &policy, dir.path());

        // Pre-existing side file must survive the orphan scan
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/x.lua"), "return 1").unwrap();

        let stats = downloader.download(&DownloadOptions::default()).unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.orphaned_files_removed, 0);
        assert!(dir.path().join("a/x.lua").exists());
    }

    #[test]
    fn test_check_orphaned_reports_without_removing() {
        let registry = MemoryRegistry::with_entries([fixtures::lua_function("a:x", "return 1")]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&registry, &policy, dir.path());
        downloader.download(&DownloadOptions::default()).unwrap();

        fs::write(dir.path().join("a/stray.lua"), "orphan").unwrap();
        let orphans = downloader.check_orphaned().unwrap();
        assert_eq!(orphans, vec![dir.path().join("a/stray.lua")]);
        assert!(dir.path().join("a/stray.lua").exists());
    }

    #[test]
    fn test_entry_without_rule_gets_no_side_file() {
        let registry = MemoryRegistry::with_entries([
            fixtures::entry("a:svc", "registry.entry").with_data("port", 8080),
        ]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&registry, &policy, dir.path());

        let stats = downloader.download(&DownloadOptions::default()).unwrap();
        assert_eq!(stats.files, 0);
        assert!(dir.path().join("a/_index.yaml").exists());
        let index = read(&dir.path().join("a/_index.yaml"));
        assert!(index.contains("port: 8080"));
    }

    #[test]
    fn test_view_page_materializes_as_html() {
        let registry = MemoryRegistry::with_entries([fixtures::typed_entry("web:home", "view.page")
            .with_data("source", "<h1>hi</h1>")]);
        let policy = SyncPolicy::builtin();
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&registry, &policy, dir.path());

        downloader.download(&DownloadOptions::default()).unwrap();
        assert_eq!(read(&dir.path().join("web/home.html")), "<h1>hi</h1>");
    }
}
