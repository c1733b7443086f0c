//! Pipeline context and processor step results
//!
//! Processors see one uniform context and may return arbitrary extra keys
//! that become visible to downstream processors, listeners and ultimately
//! the client. The strongly-typed fields (`changeset`, `version_id`,
//! `options`, `user_id`, `request_id`) are guaranteed by the core;
//! `options` and `user_id` are restored after every processor step so an
//! extension cannot rewrite security-relevant context mid-pipeline.

use governor_registry::{Changeset, VersionId};

use crate::protocol::{Detail, OptionsMap};

/// The uniform context threaded through all three pipeline phases.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Changeset to execute; rewritten by processors that transform it
    pub changeset: Option<Changeset>,
    /// Historical version to re-apply (mutually exclusive with `changeset`)
    pub version_id: Option<VersionId>,
    /// Caller options; immutable once the pipeline has begun
    pub options: OptionsMap,
    /// Caller identity; immutable once the pipeline has begun
    pub user_id: Option<String>,
    pub request_id: String,
    /// Keys carried by processors for downstream stages
    pub extra: OptionsMap,
}

impl PipelineContext {
    pub fn for_changeset(
        changeset: Changeset,
        options: OptionsMap,
        user_id: Option<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            changeset: Some(changeset),
            version_id: None,
            options,
            user_id,
            request_id: request_id.into(),
            extra: OptionsMap::new(),
        }
    }

    pub fn for_version(
        version_id: VersionId,
        options: OptionsMap,
        user_id: Option<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            changeset: None,
            version_id: Some(version_id),
            options,
            user_id,
            request_id: request_id.into(),
            extra: OptionsMap::new(),
        }
    }

    /// Merge a successful processor step into the context.
    ///
    /// A returned changeset replaces the current one; extra keys merge into
    /// the carried set. `options` and `user_id` are protected: values a
    /// processor returns under those names are dropped so the originals
    /// stay in force.
    pub fn absorb(&mut self, step: &StepResult) {
        if let Some(changeset) = &step.changeset {
            self.changeset = Some(changeset.clone());
        }
        for (key, value) in &step.extra {
            if key == "options" || key == "user_id" {
                continue;
            }
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// What a processor (or listener) returns.
///
/// `None` from [`crate::extensions::ExtensionHandler::invoke`] means "no
/// change"; otherwise a step either succeeds — possibly rewriting the
/// changeset and carrying extra keys — or fails the pipeline with its
/// message and details.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub success: bool,
    pub message: Option<String>,
    pub details: Vec<Detail>,
    /// Rewritten changeset, when the step transforms it
    pub changeset: Option<Changeset>,
    /// Keys carried to downstream stages and the final result
    pub extra: OptionsMap,
}

impl StepResult {
    /// A successful step with no changes.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failing step; the pipeline aborts with this verdict.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, detail: Detail) -> Self {
        self.details.push(detail);
        self
    }

    pub fn with_changeset(mut self, changeset: Changeset) -> Self {
        self.changeset = Some(changeset);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}
