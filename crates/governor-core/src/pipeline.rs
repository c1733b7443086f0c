//! The change pipeline: pre-process → execute → post-process
//!
//! The pre-processor screens the raw operation list (or confirms the
//! requested version exists), then runs the processor chain in priority
//! order. The executor translates the surviving changeset into store verbs
//! on a writable snapshot and commits, or re-applies a historical version.
//! The post-processor fans the applied changeset out to listeners, whose
//! results never affect the reply. Details accumulate across all phases
//! and survive failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use governor_registry::{
    screen_raw_ops, ApplyOutcome, ChangeKind, Changeset, Registry, VersionId,
};

use crate::context::PipelineContext;
use crate::extensions::{HandlerRegistry, LISTENER_META_TYPE, PROCESSOR_META_TYPE};
use crate::protocol::{Detail, OptionsMap};

/// What a pipeline worker is asked to run: a changeset or a version,
/// plus the caller context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default)]
    pub options: OptionsMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub request_id: String,
}

/// The pipeline's structured result; serialized as the worker's terminal
/// value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Detail>,
    /// The changeset that was executed, after processor rewrites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset: Option<Changeset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub request_id: String,
    /// Keys carried by processors
    #[serde(flatten)]
    pub extra: OptionsMap,
}

struct ExecOutcome {
    success: bool,
    message: String,
    version: Option<VersionId>,
    error_detail: Option<Detail>,
}

/// Runs the three pipeline phases against a registry and handler registry.
pub struct ChangePipeline<'a> {
    registry: &'a dyn Registry,
    handlers: &'a HandlerRegistry,
}

impl<'a> ChangePipeline<'a> {
    pub fn new(registry: &'a dyn Registry, handlers: &'a HandlerRegistry) -> Self {
        Self { registry, handlers }
    }

    /// Run the full pipeline.
    pub fn run(&self, input: PipelineInput) -> PipelineResult {
        let mut details = Vec::new();

        let mut ctx = match self.preprocess(input, &mut details) {
            Ok(ctx) => ctx,
            Err(failure) => return failure,
        };

        if let Err(failure) = self.run_processors(&mut ctx, &mut details) {
            return failure;
        }

        let exec = self.execute(&ctx);
        self.postprocess(ctx, exec, details)
    }

    /// Shape-validate the input and build the pipeline context.
    fn preprocess(
        &self,
        input: PipelineInput,
        details: &mut Vec<Detail>,
    ) -> Result<PipelineContext, PipelineResult> {
        if let Some(raw) = &input.changeset {
            if raw.is_empty() {
                return Err(self.validation_failure(&input, "Changeset is empty", details));
            }

            let (screened, issues) = screen_raw_ops(raw);
            for issue in &issues {
                let id = issue
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("item:{}", issue.index));
                details.push(Detail::validation(id, issue.message.clone()));
            }
            if screened.is_empty() {
                return Err(self.validation_failure(
                    &input,
                    "Changeset contains no valid operations",
                    details,
                ));
            }

            Ok(PipelineContext::for_changeset(
                screened,
                input.options,
                input.user_id,
                input.request_id,
            ))
        } else if let Some(version_id) = &input.version_id {
            let exists = match self.registry.history() {
                Ok(history) => history.iter().any(|v| v.id.as_str() == version_id.as_str()),
                Err(e) => {
                    details.push(Detail::error(
                        format!("version:{version_id}"),
                        format!("Failed to read version history: {e}"),
                    ));
                    false
                }
            };
            if !exists {
                details.push(Detail::validation(
                    format!("version:{version_id}"),
                    format!("Version not found: {version_id}"),
                ));
                return Err(self.validation_failure(
                    &input,
                    "Failed to validate version ID",
                    details,
                ));
            }

            Ok(PipelineContext::for_version(
                VersionId::new(version_id.clone()),
                input.options,
                input.user_id,
                input.request_id,
            ))
        } else {
            Err(self.validation_failure(
                &input,
                "Request carries neither a changeset nor a version id",
                details,
            ))
        }
    }

    /// Run the processor chain in ascending priority order.
    ///
    /// A failing processor aborts the pipeline with its verdict; a
    /// succeeding one may rewrite the changeset and carry extra keys, but
    /// `options` and `user_id` stay as the caller provided them.
    fn run_processors(
        &self,
        ctx: &mut PipelineContext,
        details: &mut Vec<Detail>,
    ) -> Result<(), PipelineResult> {
        let processors = match self.handlers.discover(self.registry, PROCESSOR_META_TYPE) {
            Ok(processors) => processors,
            Err(e) => {
                warn!(error = %e, "processor discovery failed, running without processors");
                return Ok(());
            }
        };

        for processor in processors {
            let Some(step) = processor.handler.invoke(ctx) else {
                continue;
            };
            details.extend(step.details.iter().cloned());
            if !step.success {
                let message = step
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("Processor failed: {}", processor.id));
                debug!(processor = %processor.id, "processor rejected the changeset");
                return Err(PipelineResult {
                    success: false,
                    message,
                    version: None,
                    details: std::mem::take(details),
                    changeset: ctx.changeset.clone(),
                    user_id: ctx.user_id.clone(),
                    request_id: ctx.request_id.clone(),
                    extra: ctx.extra.clone(),
                });
            }
            ctx.absorb(&step);
        }
        Ok(())
    }

    /// Apply the changeset (or re-apply the version) against the store.
    fn execute(&self, ctx: &PipelineContext) -> ExecOutcome {
        if let Some(changeset) = &ctx.changeset {
            return match self.apply_changeset(changeset) {
                Ok(ApplyOutcome::Applied { version }) => ExecOutcome {
                    success: true,
                    message: "Changes applied successfully".to_string(),
                    version: Some(version),
                    error_detail: None,
                },
                Ok(ApplyOutcome::NoChanges) => ExecOutcome {
                    success: true,
                    message: "No changes needed to be applied".to_string(),
                    version: None,
                    error_detail: None,
                },
                Err(e) => ExecOutcome {
                    success: false,
                    message: format!("Failed to apply changeset: {e}"),
                    version: None,
                    error_detail: Some(Detail::error("changeset", e.to_string())),
                },
            };
        }

        // Version existence was confirmed by the pre-processor
        let version_id = ctx.version_id.as_ref().expect("pipeline context has input");
        match self.registry.apply_version(version_id) {
            Ok(ApplyOutcome::Applied { version }) => ExecOutcome {
                success: true,
                message: format!("Version {version_id} applied successfully"),
                version: Some(version),
                error_detail: None,
            },
            Ok(ApplyOutcome::NoChanges) => ExecOutcome {
                success: true,
                message: "No changes needed to be applied".to_string(),
                version: None,
                error_detail: None,
            },
            Err(e) => ExecOutcome {
                success: false,
                message: format!("Failed to apply version {version_id}: {e}"),
                version: None,
                error_detail: Some(Detail::error(
                    format!("version:{version_id}"),
                    e.to_string(),
                )),
            },
        }
    }

    fn apply_changeset(
        &self,
        changeset: &Changeset,
    ) -> governor_registry::Result<ApplyOutcome> {
        let mut snapshot = self.registry.snapshot()?;
        for op in changeset.ops() {
            match op.kind {
                ChangeKind::Create => snapshot.create(op.entry.clone())?,
                ChangeKind::Update => snapshot.update(op.entry.clone())?,
                ChangeKind::Delete => snapshot.delete(&op.entry.id)?,
            }
        }
        snapshot.commit()
    }

    /// Fan out to listeners and assemble the final result.
    fn postprocess(
        &self,
        ctx: PipelineContext,
        exec: ExecOutcome,
        mut details: Vec<Detail>,
    ) -> PipelineResult {
        if let Some(detail) = exec.error_detail {
            details.push(detail);
        }

        if exec.success && ctx.changeset.is_some() {
            self.notify_listeners(&ctx);
        }

        PipelineResult {
            success: exec.success,
            message: exec.message,
            version: exec.version,
            details,
            changeset: ctx.changeset,
            user_id: ctx.user_id,
            request_id: ctx.request_id,
            extra: ctx.extra,
        }
    }

    /// Listeners are fire-and-forget: results and failures are logged and
    /// never reach the reply.
    fn notify_listeners(&self, ctx: &PipelineContext) {
        let listeners = match self.handlers.discover(self.registry, LISTENER_META_TYPE) {
            Ok(listeners) => listeners,
            Err(e) => {
                warn!(error = %e, "listener discovery failed");
                return;
            }
        };
        for listener in listeners {
            match listener.handler.invoke(ctx) {
                Some(step) if !step.success => {
                    warn!(
                        listener = %listener.id,
                        message = step.message.as_deref().unwrap_or(""),
                        "listener reported failure"
                    );
                }
                _ => debug!(listener = %listener.id, "listener notified"),
            }
        }
    }

    fn validation_failure(
        &self,
        input: &PipelineInput,
        message: &str,
        details: &mut Vec<Detail>,
    ) -> PipelineResult {
        PipelineResult {
            success: false,
            message: message.to_string(),
            version: None,
            details: std::mem::take(details),
            changeset: None,
            user_id: input.user_id.clone(),
            request_id: input.request_id.clone(),
            extra: OptionsMap::new(),
        }
    }
}
