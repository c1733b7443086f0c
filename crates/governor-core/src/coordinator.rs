//! The single-writer governance coordinator
//!
//! A long-lived actor owning all mutable governance state. It processes
//! one message at a time from two inputs — the command topic and worker
//! terminal events — so mutual exclusion needs no lock: the
//! `operation_in_progress` flag alone gates mutating commands. Handlers
//! never suspend; the only thing a busy coordinator does with a second
//! mutating command is reply "Operation already in progress".
//!
//! Upload is a two-stage chain: the uploader worker produces a changeset,
//! and on success the coordinator spawns a change-pipeline worker for it,
//! carrying the uploader's stats forward so the client sees one logical
//! response for the pair.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};
use uuid::Uuid;

use governor_registry::{Registry, VersionId};
use governor_sync::SyncPolicy;

use crate::bus::MessageBus;
use crate::config::GovernorConfig;
use crate::events::publish_version_change;
use crate::extensions::HandlerRegistry;
use crate::pipeline::PipelineInput;
use crate::protocol::{
    CommandEnvelope, GovernanceState, OperationKind, PendingChanges, RegistryState,
    ReplyEnvelope, StateReport, COMMAND_TOPIC,
};
use crate::state::{CoordinatorState, PendingOperation, Stage};
use crate::worker::{
    ExitPayload, ProcessHost, TokioProcessHost, WorkerEnv, WorkerExit, WorkerJob,
};
use crate::Result;

/// The governance coordinator actor.
pub struct Coordinator {
    registry: Arc<dyn Registry>,
    bus: Arc<dyn MessageBus>,
    host: Arc<dyn ProcessHost>,
    state: CoordinatorState,
    commands: UnboundedReceiver<Value>,
    exits: UnboundedReceiver<WorkerExit>,
}

/// Wire up a coordinator with an in-process tokio worker host and run it
/// as a background task. Must be called from within a tokio runtime.
pub fn start(
    registry: Arc<dyn Registry>,
    bus: Arc<dyn MessageBus>,
    handlers: Arc<HandlerRegistry>,
    policy: Arc<SyncPolicy>,
    config: GovernorConfig,
) -> Result<tokio::task::JoinHandle<()>> {
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    let env = Arc::new(WorkerEnv {
        registry: Arc::clone(&registry),
        handlers,
        policy,
        config: config.clone(),
    });
    let host = Arc::new(TokioProcessHost::new(
        config.process_host.clone(),
        env,
        exit_tx,
    ));
    let coordinator = Coordinator::new(registry, bus, host, exit_rx)?;
    Ok(tokio::spawn(coordinator.run()))
}

impl Coordinator {
    /// Create the coordinator: subscribes to the command topic and reads
    /// the registry's current version.
    pub fn new(
        registry: Arc<dyn Registry>,
        bus: Arc<dyn MessageBus>,
        host: Arc<dyn ProcessHost>,
        exits: UnboundedReceiver<WorkerExit>,
    ) -> Result<Self> {
        let commands = bus.subscribe(COMMAND_TOPIC)?;
        let current_version = registry.current_version()?;
        let state = CoordinatorState::new(current_version, host.name());
        Ok(Self {
            registry,
            bus,
            host,
            state,
            commands,
            exits,
        })
    }

    /// Process messages until the command subscription closes; in-flight
    /// workers are left to finish naturally.
    pub async fn run(mut self) {
        info!(
            host = %self.state.process_host,
            version = %self.state.current_version,
            "governance coordinator started"
        );
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(message) => self.handle_command(message),
                    None => break,
                },
                exit = self.exits.recv() => match exit {
                    Some(exit) => self.handle_worker_exit(exit),
                    None => break,
                },
            }
        }
        info!(
            status = "completed",
            last_version = %self.state.current_version,
            "governance coordinator stopped"
        );
    }

    fn handle_command(&mut self, message: Value) {
        let envelope: CommandEnvelope = match serde_json::from_value(message.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed command");
                if let (Some(respond_to), Some(id)) = (
                    message.get("respond_to").and_then(Value::as_str),
                    message.get("id").and_then(Value::as_str),
                ) {
                    self.reply(
                        respond_to,
                        ReplyEnvelope::failure(id, "Malformed command", Some(e.to_string())),
                    );
                }
                return;
            }
        };

        match OperationKind::parse(&envelope.operation) {
            None => {
                let mut reply = ReplyEnvelope::failure(&envelope.id, "Operation failed", None);
                reply.message = None;
                reply.error = Some(format!("Unknown operation: {}", envelope.operation));
                self.reply(&envelope.respond_to, reply);
            }
            Some(OperationKind::GetState) => self.reply_state(&envelope),
            Some(operation) => {
                if self.state.operation_in_progress {
                    let in_flight = self
                        .state
                        .current_operation
                        .map(|op| op.as_str())
                        .unwrap_or("unknown");
                    self.reply(
                        &envelope.respond_to,
                        ReplyEnvelope::failure(
                            &envelope.id,
                            format!("Operation already in progress: {in_flight}"),
                            None,
                        ),
                    );
                    return;
                }
                self.spawn_operation(operation, envelope);
            }
        }
    }

    fn spawn_operation(&mut self, operation: OperationKind, envelope: CommandEnvelope) {
        let worker_id = format!("worker-{}", Uuid::new_v4());
        let job = match operation {
            OperationKind::Upload => WorkerJob::Upload {
                options: envelope.options.clone(),
            },
            OperationKind::Download => WorkerJob::Download {
                options: envelope.options.clone(),
            },
            OperationKind::ApplyChanges => WorkerJob::Pipeline {
                input: PipelineInput {
                    changeset: envelope.changeset.clone(),
                    version_id: None,
                    options: envelope.options.clone(),
                    user_id: envelope.user_id.clone(),
                    request_id: envelope.id.clone(),
                },
            },
            OperationKind::ApplyVersion => WorkerJob::Pipeline {
                input: PipelineInput {
                    changeset: None,
                    version_id: envelope.version_id.clone(),
                    options: envelope.options.clone(),
                    user_id: envelope.user_id.clone(),
                    request_id: envelope.id.clone(),
                },
            },
            OperationKind::GetState => unreachable!("get_state never spawns"),
        };

        if let Err(e) = self.host.spawn(worker_id.clone(), job) {
            warn!(operation = %operation, error = %e, "worker spawn failed");
            self.reply(
                &envelope.respond_to,
                ReplyEnvelope::failure(
                    &envelope.id,
                    "Operation failed",
                    Some(format!("Failed to spawn worker: {e}")),
                ),
            );
            return;
        }

        let stage = if operation == OperationKind::Upload {
            Stage::Upload
        } else {
            Stage::Single
        };
        self.state.pending_operations.insert(
            worker_id,
            PendingOperation {
                respond_to: envelope.respond_to,
                request_id: envelope.id,
                operation,
                stage,
                user_id: envelope.user_id,
                options: envelope.options,
                start_time: chrono::Utc::now().timestamp(),
                upload_result: None,
            },
        );
        self.state.begin(operation);
        info!(operation = %operation, "operation started");
    }

    fn reply_state(&self, envelope: &CommandEnvelope) {
        // Read the store directly so the report reflects the freshest
        // version even while a worker is mid-flight
        let current_version = self
            .registry
            .current_version()
            .unwrap_or_else(|_| self.state.current_version.clone());

        let report = StateReport {
            registry: RegistryState {
                current_version: Some(current_version.to_string()),
                timestamp: chrono::Utc::now().timestamp(),
            },
            governance: GovernanceState {
                status: "running".to_string(),
                pid: std::process::id(),
                operation_in_progress: self.state.operation_in_progress,
                current_operation: self
                    .state
                    .current_operation
                    .map(|op| op.as_str().to_string()),
                last_operation_type: self.state.last_operation_type.clone(),
                last_updated: self.state.last_updated,
            },
            changes: PendingChanges {
                filesystem_changes_pending: self.state.filesystem_changes_pending,
                registry_changes_pending: self.state.registry_changes_pending,
            },
        };

        let reply = ReplyEnvelope {
            request_id: envelope.id.clone(),
            success: true,
            timestamp: chrono::Utc::now().timestamp(),
            state: serde_json::to_value(&report).ok(),
            ..ReplyEnvelope::default()
        };
        self.reply(&envelope.respond_to, reply);
    }

    /// Exit handler: every spawned worker delivers exactly one terminal
    /// event here.
    fn handle_worker_exit(&mut self, exit: WorkerExit) {
        let Some(pending) = self.state.pending_operations.remove(&exit.worker_id) else {
            debug!(worker_id = %exit.worker_id, "terminal event for unknown worker, ignoring");
            return;
        };

        let (result, error_message) = match exit.payload {
            Some(ExitPayload::Value(value)) => (Some(value), None),
            Some(ExitPayload::Error(error)) => (None, Some(error)),
            // A worker that exits with neither value nor error is a
            // protocol violation; fail the reply explicitly
            None => (None, Some("Worker exited without a result".to_string())),
        };

        match pending.stage {
            Stage::Upload => self.finish_upload_stage(pending, result, error_message),
            Stage::Change => self.finish_change_stage(pending, result, error_message),
            Stage::Single => self.finish_single_stage(pending, result, error_message),
        }
    }

    /// First leg of the upload chain: spawn the change worker on success,
    /// or reply directly when the scan produced nothing to apply.
    fn finish_upload_stage(
        &mut self,
        pending: PendingOperation,
        result: Option<Value>,
        error_message: Option<String>,
    ) {
        let Some(result) = result else {
            self.reply(
                &pending.respond_to,
                ReplyEnvelope::failure(&pending.request_id, "Operation failed", error_message),
            );
            self.state.finish();
            return;
        };

        let success = result
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !success {
            let mut reply = ReplyEnvelope::from_result(&pending.request_id, &result);
            reply.message.get_or_insert_with(|| "Operation failed".to_string());
            self.reply(&pending.respond_to, reply);
            self.state.finish();
            return;
        }

        let ops = result
            .get("changeset")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if ops.is_empty() {
            // In-sync tree or a check_only scan: the uploader's report is
            // the whole reply
            match result.get("has_changes").and_then(Value::as_bool) {
                Some(has_changes) => self.state.filesystem_changes_pending = has_changes,
                None => self.state.filesystem_changes_pending = false,
            }
            self.state.last_operation_type = Some("upload".to_string());
            let reply = ReplyEnvelope::from_result(&pending.request_id, &result);
            self.reply(&pending.respond_to, reply);
            self.state.finish();
            return;
        }

        let change_worker = format!("worker-{}", Uuid::new_v4());
        let input = PipelineInput {
            changeset: Some(ops),
            version_id: None,
            options: pending.options.clone(),
            user_id: pending.user_id.clone(),
            request_id: pending.request_id.clone(),
        };
        if let Err(e) = self
            .host
            .spawn(change_worker.clone(), WorkerJob::Pipeline { input })
        {
            warn!(error = %e, "change worker spawn failed after upload");
            self.reply(
                &pending.respond_to,
                ReplyEnvelope::failure(
                    &pending.request_id,
                    "Operation failed",
                    Some(format!("Failed to spawn worker: {e}")),
                ),
            );
            self.state.finish();
            return;
        }

        debug!(worker_id = %change_worker, "upload produced changes, chaining change worker");
        self.state.pending_operations.insert(
            change_worker,
            PendingOperation {
                stage: Stage::Change,
                upload_result: Some(result),
                ..pending
            },
        );
        // Still busy: the chain is one logical operation
    }

    /// Second leg of the upload chain: assemble the combined reply.
    fn finish_change_stage(
        &mut self,
        pending: PendingOperation,
        result: Option<Value>,
        error_message: Option<String>,
    ) {
        let Some(result) = result else {
            self.reply(
                &pending.respond_to,
                ReplyEnvelope::failure(&pending.request_id, "Operation failed", error_message),
            );
            self.state.finish();
            return;
        };

        let mut reply = ReplyEnvelope::from_result(&pending.request_id, &result);
        if let Some(stats) = pending
            .upload_result
            .as_ref()
            .and_then(|upload| upload.get("stats"))
        {
            reply.stats = Some(stats.clone());
        }

        if reply.success {
            self.state.filesystem_changes_pending = false;
            self.state.registry_changes_pending = true;
            self.state.last_operation_type = Some("upload".to_string());
            self.observe_version(reply.version.as_deref());
        }
        self.reply(&pending.respond_to, reply);
        self.state.finish();
    }

    /// Plain operations: apply_changes, apply_version, download.
    fn finish_single_stage(
        &mut self,
        pending: PendingOperation,
        result: Option<Value>,
        error_message: Option<String>,
    ) {
        let Some(result) = result else {
            self.reply(
                &pending.respond_to,
                ReplyEnvelope::failure(&pending.request_id, "Operation failed", error_message),
            );
            self.state.finish();
            return;
        };

        let reply = ReplyEnvelope::from_result(&pending.request_id, &result);
        if reply.success {
            match pending.operation {
                OperationKind::Download => {
                    self.state.registry_changes_pending = false;
                    self.state.last_operation_type = Some("download".to_string());
                    if let Some(version) = &reply.version {
                        self.state.last_download_version = Some(VersionId::new(version.clone()));
                    }
                }
                OperationKind::ApplyChanges | OperationKind::ApplyVersion => {
                    self.state.registry_changes_pending = true;
                    self.state.last_operation_type =
                        Some(pending.operation.as_str().to_string());
                }
                _ => {}
            }
            self.observe_version(reply.version.as_deref());
        }
        self.reply(&pending.respond_to, reply);
        self.state.finish();
    }

    /// Emit exactly one version event when the version actually moved.
    /// Runs before the reply is sent.
    fn observe_version(&mut self, new_version: Option<&str>) {
        let Some(new_version) = new_version else {
            return;
        };
        if new_version == self.state.current_version.as_str() {
            return;
        }
        let new_version = VersionId::new(new_version);
        publish_version_change(self.bus.as_ref(), &self.state.current_version, &new_version);
        info!(old = %self.state.current_version, new = %new_version, "registry version changed");
        self.state.current_version = new_version;
        self.state.last_updated = chrono::Utc::now().timestamp();
    }

    fn reply(&self, respond_to: &str, reply: ReplyEnvelope) {
        let delivered = serde_json::to_value(&reply)
            .map_err(crate::Error::from)
            .and_then(|value| self.bus.send(respond_to, value));
        if let Err(e) = delivered {
            // Timed-out clients drop their channel; a late reply is
            // silently discarded
            debug!(channel = respond_to, error = %e, "reply not delivered");
        }
    }
}
