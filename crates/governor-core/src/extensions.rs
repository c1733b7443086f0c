//! Processor and listener discovery
//!
//! Extensions are entries in the registry itself: anything whose
//! `meta.type` is `registry.processor` or `registry.listener`. Discovery
//! re-queries a fresh snapshot on every pipeline run, so installing or
//! removing an extension entry takes effect immediately. Each discovered
//! entry resolves to an invocable handler registered here under the entry
//! id; an entry with no registered handler is skipped with a warning.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::warn;

use governor_registry::Registry;

use crate::context::{PipelineContext, StepResult};
use crate::Result;

/// `meta.type` marking processor entries.
pub const PROCESSOR_META_TYPE: &str = "registry.processor";

/// `meta.type` marking listener entries.
pub const LISTENER_META_TYPE: &str = "registry.listener";

/// An invocable extension unit.
///
/// Returning `None` means "no change"; processors returning a failing
/// [`StepResult`] abort the pipeline, while listener results are only
/// logged.
pub trait ExtensionHandler: Send + Sync {
    fn invoke(&self, ctx: &PipelineContext) -> Option<StepResult>;
}

impl<F> ExtensionHandler for F
where
    F: Fn(&PipelineContext) -> Option<StepResult> + Send + Sync,
{
    fn invoke(&self, ctx: &PipelineContext) -> Option<StepResult> {
        self(ctx)
    }
}

/// A discovered, resolved extension ready to invoke.
pub struct ResolvedExtension {
    /// Entry id of the extension
    pub id: String,
    /// `meta.priority`, default 0
    pub priority: i64,
    pub handler: Arc<dyn ExtensionHandler>,
}

/// Handlers keyed by the entry id that advertises them.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ExtensionHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under an extension entry id.
    pub fn register(&self, id: impl Into<String>, handler: Arc<dyn ExtensionHandler>) {
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .insert(id.into(), handler);
    }

    /// Register a closure handler (test and simple-extension convenience).
    pub fn register_fn<F>(&self, id: impl Into<String>, handler: F)
    where
        F: Fn(&PipelineContext) -> Option<StepResult> + Send + Sync + 'static,
    {
        self.register(id, Arc::new(handler));
    }

    fn get(&self, id: &str) -> Option<Arc<dyn ExtensionHandler>> {
        self.handlers
            .read()
            .expect("handler registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Discover extensions of the given `meta.type` in a fresh snapshot,
    /// ordered by ascending `meta.priority` with ties broken by id.
    pub fn discover(
        &self,
        registry: &dyn Registry,
        meta_type: &str,
    ) -> Result<Vec<ResolvedExtension>> {
        let snapshot = registry.snapshot()?;
        let mut advertised: Vec<(String, i64)> = snapshot
            .entries()
            .into_iter()
            .filter(|entry| entry.meta_type() == Some(meta_type))
            .map(|entry| {
                let priority = entry
                    .meta
                    .get("priority")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                (entry.id.to_string(), priority)
            })
            .collect();
        advertised.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut resolved = Vec::new();
        for (id, priority) in advertised {
            match self.get(&id) {
                Some(handler) => resolved.push(ResolvedExtension {
                    id,
                    priority,
                    handler,
                }),
                None => warn!(id, meta_type, "no handler registered for extension entry, skipping"),
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor_test_utils::{fixtures, MemoryRegistry};

    #[test]
    fn test_discover_orders_by_priority_then_id() {
        let registry = MemoryRegistry::with_entries([
            fixtures::processor_entry("ext:a", 10),
            fixtures::processor_entry("ext:b", 5),
            fixtures::processor_entry("ext:c", 20),
            fixtures::processor_entry("ext:d", 5),
        ]);
        let handlers = HandlerRegistry::new();
        for id in ["ext:a", "ext:b", "ext:c", "ext:d"] {
            handlers.register_fn(id, |_| None);
        }

        let resolved = handlers.discover(&registry, PROCESSOR_META_TYPE).unwrap();
        let ids: Vec<&str> = resolved.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ext:b", "ext:d", "ext:a", "ext:c"]);
    }

    #[test]
    fn test_discover_skips_unregistered_entries() {
        let registry = MemoryRegistry::with_entries([
            fixtures::processor_entry("ext:known", 0),
            fixtures::processor_entry("ext:unknown", 0),
        ]);
        let handlers = HandlerRegistry::new();
        handlers.register_fn("ext:known", |_| None);

        let resolved = handlers.discover(&registry, PROCESSOR_META_TYPE).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "ext:known");
    }

    #[test]
    fn test_discover_separates_processors_from_listeners() {
        let registry = MemoryRegistry::with_entries([
            fixtures::processor_entry("ext:proc", 0),
            fixtures::listener_entry("ext:listen", 0),
        ]);
        let handlers = HandlerRegistry::new();
        handlers.register_fn("ext:proc", |_| None);
        handlers.register_fn("ext:listen", |_| None);

        let processors = handlers.discover(&registry, PROCESSOR_META_TYPE).unwrap();
        let listeners = handlers.discover(&registry, LISTENER_META_TYPE).unwrap();
        assert_eq!(processors.len(), 1);
        assert_eq!(listeners.len(), 1);
        assert_eq!(processors[0].id, "ext:proc");
        assert_eq!(listeners[0].id, "ext:listen");
    }

    #[test]
    fn test_discovery_sees_newly_installed_extensions() {
        let registry = MemoryRegistry::new();
        let handlers = HandlerRegistry::new();
        handlers.register_fn("ext:late", |_| None);

        assert!(handlers
            .discover(&registry, PROCESSOR_META_TYPE)
            .unwrap()
            .is_empty());

        let mut snapshot = registry.snapshot().unwrap();
        snapshot
            .create(fixtures::processor_entry("ext:late", 0))
            .unwrap();
        snapshot.commit().unwrap();

        let resolved = handlers.discover(&registry, PROCESSOR_META_TYPE).unwrap();
        assert_eq!(resolved.len(), 1);
    }
}
