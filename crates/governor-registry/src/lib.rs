//! Data model and store interface for the registry governance service
//!
//! This crate defines the shapes every other layer agrees on:
//!
//! - **Entries**: `<namespace>:<name>` records typed by `kind` with open
//!   `meta`/`data` mappings
//! - **Changesets**: ordered create/update/delete operations, their wire
//!   screening, counts, and minimal-delta construction
//! - **Versions**: opaque version ids and history records
//! - **Store interface**: the [`Registry`]/[`Snapshot`] traits the
//!   governance service consumes; the store itself is an external
//!   collaborator
//!
//! # Architecture
//!
//! ```text
//!  governor-core   governor-sync
//!        \             /
//!        governor-registry
//! ```

pub mod change;
pub mod entry;
pub mod error;
pub mod store;
pub mod version;

pub use change::{
    build_delta, screen_raw_ops, ChangeKind, ChangeOp, ChangeStats, Changeset, ChangesetBuilder,
    ShapeIssue,
};
pub use entry::{Entry, EntryId, Fields};
pub use error::{Error, Result};
pub use store::{ApplyOutcome, Registry, Snapshot};
pub use version::{VersionId, VersionInfo};
