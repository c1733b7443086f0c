//! Worker jobs and the process host
//!
//! Workers run as independent tokio tasks spawned through a
//! [`ProcessHost`]. They share nothing with the coordinator: a job is
//! handed over at spawn, and exactly one terminal [`WorkerExit`] event
//! comes back — a structured value when the job produced a result
//! (successful or not), an error string when the worker itself failed.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use governor_registry::Registry;
use governor_sync::{DownloadOptions, Downloader, SyncPolicy, Uploader};

use crate::config::GovernorConfig;
use crate::extensions::HandlerRegistry;
use crate::pipeline::{ChangePipeline, PipelineInput};
use crate::protocol::OptionsMap;
use crate::{Error, Result};

/// Unique id of a spawned worker.
pub type WorkerId = String;

/// Work handed to a spawned worker.
#[derive(Debug, Clone)]
pub enum WorkerJob {
    Upload { options: OptionsMap },
    Download { options: OptionsMap },
    Pipeline { input: PipelineInput },
}

/// A worker's terminal payload.
#[derive(Debug, Clone)]
pub enum ExitPayload {
    /// The worker's structured result (which may itself report failure)
    Value(Value),
    /// The worker failed outright
    Error(String),
}

/// The single terminal event delivered per spawned worker.
#[derive(Debug, Clone)]
pub struct WorkerExit {
    pub worker_id: WorkerId,
    /// `None` models a worker that exited with neither value nor error
    pub payload: Option<ExitPayload>,
}

/// Spawns monitored workers; the runtime behind it is an external
/// collaborator.
pub trait ProcessHost: Send + Sync {
    /// Host name recorded in coordinator state.
    fn name(&self) -> &str;

    /// Start a worker. Exactly one [`WorkerExit`] for `worker_id` must
    /// eventually reach the coordinator.
    fn spawn(&self, worker_id: WorkerId, job: WorkerJob) -> Result<()>;
}

/// Everything a worker needs, shared immutably across spawns.
pub struct WorkerEnv {
    pub registry: Arc<dyn Registry>,
    pub handlers: Arc<HandlerRegistry>,
    pub policy: Arc<SyncPolicy>,
    pub config: GovernorConfig,
}

/// [`ProcessHost`] that runs workers as tokio tasks in this process.
pub struct TokioProcessHost {
    name: String,
    env: Arc<WorkerEnv>,
    exits: UnboundedSender<WorkerExit>,
}

impl TokioProcessHost {
    pub fn new(
        name: impl Into<String>,
        env: Arc<WorkerEnv>,
        exits: UnboundedSender<WorkerExit>,
    ) -> Self {
        Self {
            name: name.into(),
            env,
            exits,
        }
    }
}

impl ProcessHost for TokioProcessHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, worker_id: WorkerId, job: WorkerJob) -> Result<()> {
        let env = Arc::clone(&self.env);
        let exits = self.exits.clone();
        tokio::spawn(async move {
            debug!(worker_id, "worker started");
            let payload = match run_job(&env, job) {
                Ok(value) => ExitPayload::Value(value),
                Err(e) => ExitPayload::Error(e.to_string()),
            };
            // The coordinator may already be gone during shutdown
            let _ = exits.send(WorkerExit {
                worker_id,
                payload: Some(payload),
            });
        });
        Ok(())
    }
}

/// Execute one worker job to its structured result.
pub fn run_job(env: &WorkerEnv, job: WorkerJob) -> Result<Value> {
    match job {
        WorkerJob::Upload { options } => {
            let directory = resolve_directory(&options, &env.config)?;
            if let Some(filesystem) = resolve_filesystem(&options, &env.config) {
                debug!(filesystem, "upload uses configured filesystem");
            }
            let uploader = Uploader::new(env.registry.as_ref(), &env.policy);
            let check_only = options
                .get("check_only")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if check_only {
                Ok(serde_json::to_value(uploader.check(&directory)?)?)
            } else {
                Ok(serde_json::to_value(uploader.upload(&directory)?)?)
            }
        }
        WorkerJob::Download { options } => {
            let directory = resolve_directory(&options, &env.config)?;
            if let Some(filesystem) = resolve_filesystem(&options, &env.config) {
                debug!(filesystem, "download uses configured filesystem");
            }
            let downloader = Downloader::new(env.registry.as_ref(), &env.policy, directory);
            let download_options = DownloadOptions::from_options(&options);
            let stats = downloader.download(&download_options)?;
            let version = env.registry.current_version()?;
            Ok(serde_json::json!({
                "success": true,
                "message": "Download complete",
                "stats": stats,
                "version": version,
            }))
        }
        WorkerJob::Pipeline { input } => {
            let pipeline = ChangePipeline::new(env.registry.as_ref(), &env.handlers);
            Ok(serde_json::to_value(pipeline.run(input))?)
        }
    }
}

/// The sync directory: `options.directory`, falling back to the configured
/// source dir (`APP_SRC`).
fn resolve_directory(options: &OptionsMap, config: &GovernorConfig) -> Result<PathBuf> {
    if let Some(directory) = options.get("directory").and_then(Value::as_str) {
        return Ok(PathBuf::from(directory));
    }
    config
        .source_dir
        .clone()
        .ok_or_else(|| Error::rejected("No sync directory configured", Vec::new()))
}

/// The filesystem id: `options.filesystem`, falling back to `APP_FS`.
/// The local driver ignores it; it is recorded for diagnostics.
fn resolve_filesystem(options: &OptionsMap, config: &GovernorConfig) -> Option<String> {
    options
        .get("filesystem")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| config.filesystem.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor_test_utils::{fixtures, MemoryRegistry};
    use serde_json::json;

    fn env_for(registry: MemoryRegistry, dir: &std::path::Path) -> WorkerEnv {
        WorkerEnv {
            registry: Arc::new(registry),
            handlers: Arc::new(HandlerRegistry::new()),
            policy: Arc::new(SyncPolicy::builtin()),
            config: GovernorConfig::default().with_source_dir(dir),
        }
    }

    #[test]
    fn test_resolve_directory_prefers_options() {
        let config = GovernorConfig::default().with_source_dir("/from/config");
        let mut options = OptionsMap::new();
        options.insert("directory".into(), json!("/from/options"));
        assert_eq!(
            resolve_directory(&options, &config).unwrap(),
            PathBuf::from("/from/options")
        );
        assert_eq!(
            resolve_directory(&OptionsMap::new(), &config).unwrap(),
            PathBuf::from("/from/config")
        );
    }

    #[test]
    fn test_resolve_directory_requires_some_source() {
        let err = resolve_directory(&OptionsMap::new(), &GovernorConfig::default()).unwrap_err();
        assert!(err.to_string().contains("No sync directory"));
    }

    #[test]
    fn test_download_job_reports_stats_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(
            MemoryRegistry::with_entries([fixtures::lua_function("a:x", "return 1")]),
            dir.path(),
        );

        let result = run_job(
            &env,
            WorkerJob::Download {
                options: OptionsMap::new(),
            },
        )
        .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["stats"]["entries"], 1);
        assert_eq!(result["version"], "v1");
        assert!(dir.path().join("a/x.lua").is_file());
    }

    #[test]
    fn test_upload_job_check_only() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(MemoryRegistry::new(), dir.path());

        let result = run_job(
            &env,
            WorkerJob::Upload {
                options: {
                    let mut options = OptionsMap::new();
                    options.insert("check_only".into(), json!(true));
                    options
                },
            },
        )
        .unwrap();
        assert_eq!(result["has_changes"], false);
        assert_eq!(result["count"], 0);
    }

    #[test]
    fn test_pipeline_job_applies_changeset() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_for(MemoryRegistry::new(), dir.path());

        let input = PipelineInput {
            changeset: Some(vec![json!({
                "kind": "entry.create",
                "entry": {"id": "a:x", "kind": "registry.entry"},
            })]),
            version_id: None,
            options: OptionsMap::new(),
            user_id: None,
            request_id: "req-1".into(),
        };
        let result = run_job(&env, WorkerJob::Pipeline { input }).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["version"], "v1");
    }
}
