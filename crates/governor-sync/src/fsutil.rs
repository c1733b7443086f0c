//! Atomic file I/O and content comparison
//!
//! Writes go through a write-to-temp-then-rename path with an advisory lock
//! so concurrent readers never observe partial files. Content comparison
//! uses SHA-256 checksums (`sha256:<hex>`), the same canonical format used
//! for drift detection.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Prefix for all checksums produced by this module
const PREFIX: &str = "sha256:";

/// Compute the SHA-256 checksum of content in canonical `sha256:<hex>` form.
pub fn content_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{}{:x}", PREFIX, hasher.finalize())
}

/// Whether the file at `path` exists with exactly the given content.
pub fn file_matches(path: &Path, content: &[u8]) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let existing = fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(content_checksum(&existing) == content_checksum(content))
}

/// Write content atomically, creating parent directories as needed.
///
/// Uses write-to-temp-then-rename with an exclusive advisory lock on the
/// temp file to prevent partial writes.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    // Temp file in the same directory so the rename stays on one filesystem
    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id()
    );
    let temp_path = path.with_file_name(&temp_name);

    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| Error::io(&temp_path, e))?;

    // Fully qualified: std::fs::File has its own lock methods on newer
    // toolchains and the names collide with the fs2 trait.
    fs2::FileExt::lock_exclusive(&temp_file).map_err(|_| Error::LockFailed {
        path: path.to_path_buf(),
    })?;

    temp_file
        .write_all(content)
        .map_err(|e| Error::io(&temp_path, e))?;
    temp_file
        .sync_all()
        .map_err(|e| Error::io(&temp_path, e))?;

    fs2::FileExt::unlock(&temp_file).map_err(|_| Error::LockFailed {
        path: path.to_path_buf(),
    })?;

    fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Write content only when it differs from what is on disk.
///
/// Returns `true` when a write happened, `false` when the existing content
/// already matched.
pub fn write_if_changed(path: &Path, content: &[u8]) -> Result<bool> {
    if file_matches(path, content)? {
        return Ok(false);
    }
    write_atomic(path, content)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_has_prefix_and_is_deterministic() {
        let a = content_checksum(b"hello");
        let b = content_checksum(b"hello");
        assert!(a.starts_with("sha256:"));
        assert_eq!(a, b);
        assert_ne!(a, content_checksum(b"other"));
    }

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        write_atomic(&path, b"content").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "content");
    }

    #[test]
    fn test_write_if_changed_skips_matching_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        assert!(write_if_changed(&path, b"one").unwrap());
        assert!(!write_if_changed(&path, b"one").unwrap());
        assert!(write_if_changed(&path, b"two").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn test_file_matches_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!file_matches(&dir.path().join("missing"), b"x").unwrap());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        write_atomic(&path, b"content").unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
