//! Source-tree entry loader
//!
//! Reads the on-disk representation produced by the downloader back into
//! entries: every directory under the base that carries an `_index.yaml`
//! is a namespace, and `file://` references in source-bearing fields are
//! resolved against side files in the same directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use governor_registry::Entry;

use crate::index::{self, INDEX_FILE_NAME};
use crate::policy::SyncPolicy;
use crate::{Error, Result};

/// Scheme prefix marking an externalized source field.
pub const FILE_SCHEME: &str = "file://";

/// Load all entries from a source tree.
pub fn load_tree(base: &Path, policy: &SyncPolicy) -> Result<Vec<Entry>> {
    let mut directories = Vec::new();
    collect_directories(base, &mut directories)?;
    directories.sort();

    let mut entries = Vec::new();
    for dir in directories {
        let index_path = dir.join(INDEX_FILE_NAME);
        if !index_path.is_file() {
            continue;
        }

        let namespace = match namespace_for(base, &dir) {
            Some(ns) => ns,
            None => {
                warn!(path = %index_path.display(), "index file at tree root has no namespace, skipping");
                continue;
            }
        };

        let content =
            fs::read_to_string(&index_path).map_err(|e| Error::io(&index_path, e))?;
        let doc = index::parse_index(&content, &index_path)?;

        for fields in &doc.entries {
            let mut entry = index::index_fields_to_entry(&namespace, fields)?;
            resolve_source_file(&mut entry, &dir, &namespace, policy)?;
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Replace a `file://` reference in the entry's source field with the side
/// file's content.
fn resolve_source_file(
    entry: &mut Entry,
    dir: &Path,
    namespace: &str,
    policy: &SyncPolicy,
) -> Result<()> {
    let Some(rule) = policy.rule_for(entry) else {
        return Ok(());
    };
    let Some(value) = entry.data_str(&rule.source_field) else {
        return Ok(());
    };
    let Some(file_name) = value.strip_prefix(FILE_SCHEME) else {
        return Ok(());
    };

    let file_name = file_name.to_string();
    let path = dir.join(&file_name);
    let content = fs::read_to_string(&path).map_err(|e| Error::SourceFile {
        namespace: namespace.to_string(),
        file: file_name,
        message: e.to_string(),
    })?;
    let field = rule.source_field.clone();
    entry.set_data_str(&field, content);
    Ok(())
}

fn namespace_for(base: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(base).ok()?;
    let components: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if components.is_empty() {
        return None;
    }
    Some(components.join("."))
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
