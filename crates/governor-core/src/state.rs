//! Coordinator state
//!
//! All mutable governance state lives here, owned exclusively by the
//! coordinator task. Mutual exclusion of mutating operations is enforced
//! by `operation_in_progress`, not by a lock: only the coordinator reads
//! or writes this state.

use std::collections::HashMap;

use governor_registry::VersionId;
use serde_json::Value;

use crate::protocol::{OperationKind, OptionsMap};

/// Which leg of a (possibly chained) operation a worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// First leg of an upload: scan the filesystem and produce a changeset
    Upload,
    /// Second leg of an upload: apply the produced changeset
    Change,
    /// A plain single-worker operation
    Single,
}

/// Book-keeping for one spawned worker.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    /// Reply channel of the originating client call
    pub respond_to: String,
    pub request_id: String,
    pub operation: OperationKind,
    pub stage: Stage,
    pub user_id: Option<String>,
    pub options: OptionsMap,
    /// Unix seconds at spawn
    pub start_time: i64,
    /// Uploader result carried into the change leg for final stats
    pub upload_result: Option<Value>,
}

/// Process-local coordinator state.
#[derive(Debug)]
pub struct CoordinatorState {
    /// Last known registry version
    pub current_version: VersionId,
    /// Unix seconds of the last state change
    pub last_updated: i64,
    pub operation_in_progress: bool,
    pub current_operation: Option<OperationKind>,
    pub operation_start_time: Option<i64>,
    /// Live workers by worker id; removed on their terminal event
    pub pending_operations: HashMap<String, PendingOperation>,
    /// Registry holds changes not yet downloaded
    pub registry_changes_pending: bool,
    /// Filesystem holds changes not yet uploaded
    pub filesystem_changes_pending: bool,
    pub last_download_version: Option<VersionId>,
    pub last_operation_type: Option<String>,
    /// Host used to spawn workers
    pub process_host: String,
}

impl CoordinatorState {
    pub fn new(current_version: VersionId, process_host: impl Into<String>) -> Self {
        Self {
            current_version,
            last_updated: chrono::Utc::now().timestamp(),
            operation_in_progress: false,
            current_operation: None,
            operation_start_time: None,
            pending_operations: HashMap::new(),
            registry_changes_pending: false,
            filesystem_changes_pending: false,
            last_download_version: None,
            last_operation_type: None,
            process_host: process_host.into(),
        }
    }

    /// Mark an operation as in flight.
    pub fn begin(&mut self, operation: OperationKind) {
        let now = chrono::Utc::now().timestamp();
        self.operation_in_progress = true;
        self.current_operation = Some(operation);
        self.operation_start_time = Some(now);
        self.last_updated = now;
    }

    /// Clear the in-flight flag.
    pub fn finish(&mut self) {
        self.operation_in_progress = false;
        self.current_operation = None;
        self.operation_start_time = None;
        self.last_updated = chrono::Utc::now().timestamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_finish() {
        let mut state = CoordinatorState::new(VersionId::new("v1"), "app:processes");
        assert!(!state.operation_in_progress);

        state.begin(OperationKind::Upload);
        assert!(state.operation_in_progress);
        assert_eq!(state.current_operation, Some(OperationKind::Upload));
        assert!(state.operation_start_time.is_some());

        state.finish();
        assert!(!state.operation_in_progress);
        assert!(state.current_operation.is_none());
    }
}
