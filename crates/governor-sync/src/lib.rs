//! Filesystem synchronization for the registry governance service
//!
//! Two bulk operations reconcile the registry against an on-disk
//! YAML/source-file representation:
//!
//! - **Uploader** ([`upload::Uploader`]): loads entries from a source tree,
//!   diffs them against a live snapshot and emits the minimal changeset
//! - **Downloader** ([`download::Downloader`]): materializes the snapshot to
//!   a directory tree, externalizing source-bearing fields as side files and
//!   garbage-collecting orphans
//!
//! The on-disk format is one directory per namespace with an `_index.yaml`
//! ([`index`]) plus side files selected by the materialization policy
//! ([`policy::SyncPolicy`]).

pub mod download;
pub mod error;
pub mod fsutil;
pub mod index;
pub mod loader;
pub mod policy;
pub mod upload;

pub use download::{DownloadOptions, DownloadStats, Downloader};
pub use error::{Error, Result};
pub use index::INDEX_FILE_NAME;
pub use loader::{load_tree, FILE_SCHEME};
pub use policy::{MaterializeRule, SyncPolicy};
pub use upload::{UploadCheck, UploadReport, Uploader, SOURCE_DISPLAY_LIMIT};
