//! Empty-dependency cleaner
//!
//! Lua entries accumulate empty `modules` arrays and empty `imports` maps
//! as dependencies come and go; this processor strips them before the
//! changeset is applied.

use serde_json::Value;

use governor_core::{ExtensionHandler, PipelineContext, StepResult};
use governor_registry::ChangeKind;

use crate::is_lua_kind;

/// Processor deleting empty `modules`/`imports` from Lua entry data.
#[derive(Debug, Clone, Copy)]
pub struct EmptyDepsCleaner;

impl ExtensionHandler for EmptyDepsCleaner {
    fn invoke(&self, ctx: &PipelineContext) -> Option<StepResult> {
        let changeset = ctx.changeset.as_ref()?;

        let mut rewritten = changeset.clone();
        let mut changed = false;
        for op in rewritten.ops_mut() {
            if op.kind == ChangeKind::Delete || !is_lua_kind(&op.entry.kind) {
                continue;
            }
            let data = &mut op.entry.data;
            if data
                .get("modules")
                .and_then(Value::as_array)
                .is_some_and(Vec::is_empty)
            {
                data.remove("modules");
                changed = true;
            }
            if data
                .get("imports")
                .and_then(Value::as_object)
                .is_some_and(serde_json::Map::is_empty)
            {
                data.remove("imports");
                changed = true;
            }
        }

        if !changed {
            return None;
        }
        Some(StepResult::ok().with_changeset(rewritten))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor_core::protocol::OptionsMap;
    use governor_registry::{ChangeOp, Changeset};
    use governor_test_utils::fixtures;
    use serde_json::json;

    fn ctx_for(ops: Vec<ChangeOp>) -> PipelineContext {
        PipelineContext::for_changeset(
            Changeset::from_ops(ops),
            OptionsMap::new(),
            None,
            "req-1",
        )
    }

    #[test]
    fn test_strips_empty_modules_and_imports() {
        let entry = fixtures::lua_function("a:x", "return 1")
            .with_data("modules", json!([]))
            .with_data("imports", json!({}));
        let ctx = ctx_for(vec![ChangeOp::create(entry)]);

        let step = EmptyDepsCleaner.invoke(&ctx).unwrap();
        assert!(step.success);
        let rewritten = step.changeset.unwrap();
        let data = &rewritten.ops()[0].entry.data;
        assert!(!data.contains_key("modules"));
        assert!(!data.contains_key("imports"));
        assert!(data.contains_key("source"));
    }

    #[test]
    fn test_keeps_populated_dependencies() {
        let entry = fixtures::lua_function("a:x", "return 1")
            .with_data("modules", json!(["json"]))
            .with_data("imports", json!({"util": "lib:util"}));
        let ctx = ctx_for(vec![ChangeOp::create(entry)]);
        assert!(EmptyDepsCleaner.invoke(&ctx).is_none());
    }

    #[test]
    fn test_ignores_non_lua_entries() {
        let entry = fixtures::entry("a:x", "registry.entry").with_data("modules", json!([]));
        let ctx = ctx_for(vec![ChangeOp::create(entry)]);
        assert!(EmptyDepsCleaner.invoke(&ctx).is_none());
    }
}
