//! Change-log listener
//!
//! Fire-and-forget listener logging every applied changeset. Its result
//! never affects the pipeline reply; it exists to give deployments an
//! audit trail and to exercise the listener chain.

use tracing::info;

use governor_core::{ExtensionHandler, PipelineContext, StepResult};

/// Listener logging applied changesets.
#[derive(Debug, Clone, Copy)]
pub struct ChangeLogListener;

impl ExtensionHandler for ChangeLogListener {
    fn invoke(&self, ctx: &PipelineContext) -> Option<StepResult> {
        let changeset = ctx.changeset.as_ref()?;
        let stats = changeset.stats();
        info!(
            request_id = %ctx.request_id,
            user_id = ctx.user_id.as_deref().unwrap_or("anonymous"),
            create = stats.create,
            update = stats.update,
            delete = stats.delete,
            "changeset applied"
        );
        None
    }
}
