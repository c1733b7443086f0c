//! Kind linter
//!
//! Rejects changesets introducing entries whose kind is not in the
//! allow-list. Unknown kinds sharing a prefix with a known one get a
//! "did you mean …" suggestion.

use governor_core::{Detail, ExtensionHandler, PipelineContext, StepResult};
use governor_registry::ChangeKind;

/// Kinds the deployment accepts.
const KNOWN_KINDS: &[&str] = &[
    "agent.gen1",
    "function.lua",
    "library.lua",
    "process.lua",
    "registry.entry",
    "template.jet",
    "workflow.lua",
];

/// Processor rejecting unknown entry kinds.
#[derive(Debug, Clone)]
pub struct KindLint {
    known: Vec<String>,
}

impl Default for KindLint {
    fn default() -> Self {
        Self {
            known: KNOWN_KINDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl KindLint {
    /// Linter with a custom allow-list.
    pub fn with_kinds(known: impl IntoIterator<Item = String>) -> Self {
        Self {
            known: known.into_iter().collect(),
        }
    }

    fn suggestions(&self, unknown: &str) -> Vec<&str> {
        let prefix = unknown.split('.').next().unwrap_or(unknown);
        self.known
            .iter()
            .filter(|k| k.split('.').next() == Some(prefix))
            .map(String::as_str)
            .collect()
    }
}

impl ExtensionHandler for KindLint {
    fn invoke(&self, ctx: &PipelineContext) -> Option<StepResult> {
        let changeset = ctx.changeset.as_ref()?;

        let mut details = Vec::new();
        for op in changeset.ops() {
            if op.kind == ChangeKind::Delete {
                continue;
            }
            let entry = &op.entry;
            if entry.kind.is_empty() {
                details.push(Detail::error(
                    entry.id.to_string(),
                    "Entry has no kind".to_string(),
                ));
                continue;
            }
            if self.known.iter().any(|k| k == &entry.kind) {
                continue;
            }

            let suggestions = self.suggestions(&entry.kind);
            let message = if suggestions.is_empty() {
                format!("Unknown kind: {}", entry.kind)
            } else {
                format!(
                    "Unknown kind: {} (did you mean {}?)",
                    entry.kind,
                    suggestions.join(", ")
                )
            };
            details.push(Detail::error(entry.id.to_string(), message));
        }

        if details.is_empty() {
            return None;
        }
        let mut step = StepResult::fail("Changeset contains entries with unknown kinds");
        step.details = details;
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor_core::protocol::OptionsMap;
    use governor_registry::{ChangeOp, Changeset};
    use governor_test_utils::fixtures;

    fn ctx_for(ops: Vec<ChangeOp>) -> PipelineContext {
        PipelineContext::for_changeset(
            Changeset::from_ops(ops),
            OptionsMap::new(),
            None,
            "req-1",
        )
    }

    #[test]
    fn test_known_kinds_pass() {
        let lint = KindLint::default();
        let ctx = ctx_for(vec![
            ChangeOp::create(fixtures::entry("a:x", "function.lua")),
            ChangeOp::create(fixtures::entry("a:y", "registry.entry")),
        ]);
        assert!(lint.invoke(&ctx).is_none());
    }

    #[test]
    fn test_unknown_kind_fails_with_suggestion() {
        let lint = KindLint::default();
        let ctx = ctx_for(vec![ChangeOp::create(fixtures::entry("a:x", "function.luaa"))]);
        let step = lint.invoke(&ctx).unwrap();
        assert!(!step.success);
        assert_eq!(step.details.len(), 1);
        assert!(step.details[0].message.contains("did you mean function.lua"));
    }

    #[test]
    fn test_unknown_kind_without_neighbors_has_no_suggestion() {
        let lint = KindLint::default();
        let ctx = ctx_for(vec![ChangeOp::create(fixtures::entry("a:x", "widget.c"))]);
        let step = lint.invoke(&ctx).unwrap();
        assert_eq!(step.details[0].message, "Unknown kind: widget.c");
    }

    #[test]
    fn test_deletes_are_ignored() {
        let lint = KindLint::default();
        let ctx = ctx_for(vec![ChangeOp::delete(fixtures::id("a:x"))]);
        assert!(lint.invoke(&ctx).is_none());
    }

    #[test]
    fn test_custom_allow_list() {
        let lint = KindLint::with_kinds(["script.python".to_string()]);
        let ctx = ctx_for(vec![ChangeOp::create(fixtures::entry("a:x", "function.lua"))]);
        assert!(lint.invoke(&ctx).is_some());
    }
}
