//! Method inferrer
//!
//! `function.lua` entries are expected to name the function they export in
//! `data.method`. When the field is missing, this processor infers it from
//! the module's final `return` statement: a bare identifier (`return
//! handler`) or a single-field table constructor (`return { handler =
//! handler }`). Successful inference is reported as a warning detail;
//! a module whose return cannot be read fails the pipeline.

use governor_core::{Detail, ExtensionHandler, PipelineContext, StepResult};
use governor_registry::ChangeKind;

/// Processor inferring `data.method` for `function.lua` entries.
#[derive(Debug, Clone, Copy)]
pub struct MethodInferrer;

impl ExtensionHandler for MethodInferrer {
    fn invoke(&self, ctx: &PipelineContext) -> Option<StepResult> {
        let changeset = ctx.changeset.as_ref()?;

        let mut rewritten = changeset.clone();
        let mut details = Vec::new();
        let mut failures = Vec::new();
        let mut changed = false;

        for op in rewritten.ops_mut() {
            if op.kind == ChangeKind::Delete || op.entry.kind != "function.lua" {
                continue;
            }
            if op.entry.data.get("method").is_some() {
                continue;
            }
            let Some(source) = op.entry.data_str("source") else {
                continue;
            };

            match infer_method(source) {
                Some(method) => {
                    details.push(Detail::warning(
                        op.entry.id.to_string(),
                        format!("Inferred method '{method}' from the module's return"),
                    ));
                    op.entry.set_data_str("method", method);
                    changed = true;
                }
                None => failures.push(Detail::error(
                    op.entry.id.to_string(),
                    "Could not infer method from the module's return".to_string(),
                )),
            }
        }

        if !failures.is_empty() {
            let mut step = StepResult::fail("Failed to infer method for function entries");
            step.details = details;
            step.details.extend(failures);
            return Some(step);
        }
        if !changed {
            return None;
        }
        let mut step = StepResult::ok().with_changeset(rewritten);
        step.details = details;
        Some(step)
    }
}

/// The method named by the module's final `return` statement, if it is a
/// bare identifier or a single-field table constructor.
fn infer_method(source: &str) -> Option<String> {
    let expr = final_return_expression(source)?;

    if is_identifier(&expr) {
        return Some(expr);
    }

    // Single-field table constructor: { name = value } or { name }
    let inner = expr.strip_prefix('{')?.strip_suffix('}')?.trim();
    if inner.is_empty() || inner.contains(',') {
        return None;
    }
    let name = match inner.split_once('=') {
        Some((name, _value)) => name.trim(),
        None => inner,
    };
    is_identifier(name).then(|| name.to_string())
}

fn final_return_expression(source: &str) -> Option<String> {
    let line = source
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("--"))?;
    let expr = line.strip_prefix("return")?.trim();
    if expr.is_empty() {
        return None;
    }
    Some(expr.to_string())
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
