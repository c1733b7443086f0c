//! Example extensions for the governance change pipeline
//!
//! These processors and listeners are ordinary [`ExtensionHandler`]
//! implementations registered under the entry ids that advertise them in
//! the registry. They demonstrate the pipeline contract: validate or
//! transform the changeset before execution, or observe it afterwards.
//!
//! - [`kind_lint::KindLint`] — rejects unknown entry kinds with
//!   "did you mean …" suggestions
//! - [`cleanup::EmptyDepsCleaner`] — strips empty `modules`/`imports`
//!   from Lua entry data
//! - [`method::MethodInferrer`] — infers `data.method` for `function.lua`
//!   entries from the final `return` statement
//! - [`log_listener::ChangeLogListener`] — logs applied changesets
//!
//! [`ExtensionHandler`]: governor_core::ExtensionHandler

pub mod cleanup;
pub mod kind_lint;
pub mod log_listener;
pub mod method;

use std::sync::Arc;

use governor_core::HandlerRegistry;

/// Conventional entry id of the kind linter.
pub const KIND_LINT_ID: &str = "system.processors:kind_lint";
/// Conventional entry id of the empty-deps cleaner.
pub const EMPTY_DEPS_ID: &str = "system.processors:empty_deps";
/// Conventional entry id of the method inferrer.
pub const METHOD_INFER_ID: &str = "system.processors:method_infer";
/// Conventional entry id of the change-log listener.
pub const CHANGE_LOG_ID: &str = "system.listeners:change_log";

/// Register every shipped extension under its conventional entry id.
pub fn register_all(handlers: &HandlerRegistry) {
    handlers.register(KIND_LINT_ID, Arc::new(kind_lint::KindLint::default()));
    handlers.register(EMPTY_DEPS_ID, Arc::new(cleanup::EmptyDepsCleaner));
    handlers.register(METHOD_INFER_ID, Arc::new(method::MethodInferrer));
    handlers.register(CHANGE_LOG_ID, Arc::new(log_listener::ChangeLogListener));
}

/// Entry kinds carrying Lua source.
pub(crate) const LUA_KINDS: &[&str] = &[
    "function.lua",
    "library.lua",
    "process.lua",
    "workflow.lua",
];

pub(crate) fn is_lua_kind(kind: &str) -> bool {
    LUA_KINDS.contains(&kind)
}
