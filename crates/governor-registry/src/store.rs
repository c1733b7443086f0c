//! Consumed registry-store interface
//!
//! The entry store itself is an external collaborator; this module declares
//! the surface the governance service uses: consistent snapshots that accept
//! staged mutations, version history, and version re-application. An
//! in-memory implementation for tests lives in `governor-test-utils`.

use crate::change::{self, Changeset};
use crate::entry::{Entry, EntryId};
use crate::version::{VersionId, VersionInfo};
use crate::Result;

/// Result of committing staged changes or re-applying a version.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The store advanced to a new version
    Applied { version: VersionId },
    /// The staged changes were a no-op; the version did not move
    NoChanges,
}

impl ApplyOutcome {
    /// The new version, when one was produced.
    pub fn version(&self) -> Option<&VersionId> {
        match self {
            Self::Applied { version } => Some(version),
            Self::NoChanges => None,
        }
    }
}

/// An immutable, consistent view of the registry that accepts staged
/// mutations and commits them atomically.
pub trait Snapshot: Send {
    /// All entries in the snapshot.
    fn entries(&self) -> Vec<Entry>;

    /// Look up a single entry.
    fn find(&self, id: &EntryId) -> Option<Entry>;

    /// Stage a create.
    fn create(&mut self, entry: Entry) -> Result<()>;

    /// Stage an update.
    fn update(&mut self, entry: Entry) -> Result<()>;

    /// Stage a delete.
    fn delete(&mut self, id: &EntryId) -> Result<()>;

    /// Commit all staged mutations atomically.
    fn commit(self: Box<Self>) -> Result<ApplyOutcome>;
}

/// The versioned entry store consumed by the governance service.
pub trait Registry: Send + Sync {
    /// The store's current version id.
    fn current_version(&self) -> Result<VersionId>;

    /// Take a consistent snapshot.
    fn snapshot(&self) -> Result<Box<dyn Snapshot>>;

    /// The version history, most recent last.
    fn history(&self) -> Result<Vec<VersionInfo>>;

    /// Re-apply a historical version, producing a new version.
    fn apply_version(&self, version: &VersionId) -> Result<ApplyOutcome>;

    /// Look up a single entry in a fresh snapshot.
    fn find(&self, id: &EntryId) -> Result<Option<Entry>> {
        Ok(self.snapshot()?.find(id))
    }

    /// The minimal changeset transforming `current` into `target`.
    fn build_delta(&self, current: &[Entry], target: &[Entry]) -> Changeset {
        change::build_delta(current, target)
    }
}
