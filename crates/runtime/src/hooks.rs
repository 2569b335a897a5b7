//! Priority-ordered synchronous extension points.
//!
//! Two kinds of hooks: actions (fire-and-observe) and filters (transform a
//! value through a chain). Handlers run ascending by priority, stable on
//! ties. The handler list is snapshotted under the lock and released before
//! any callback runs, so a handler may safely re-enter the manager.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::error;

use crate::metrics::MetricsCollector;

/// Context handed to a hook handler.
pub struct HookContext {
    /// Event name being dispatched.
    pub event: String,
    /// Input payload; for filters, the current accumulated value.
    pub input: Value,
    output: Option<Value>,
}

impl HookContext {
    fn new(event: &str, input: Value) -> Self {
        Self {
            event: event.to_string(),
            input,
            output: None,
        }
    }

    /// Replace the accumulated value (filters only).
    pub fn set_output(&mut self, value: Value) {
        self.output = Some(value);
    }

    /// The replacement if set, otherwise the input.
    pub fn into_output(self) -> Value {
        self.output.unwrap_or(self.input)
    }
}

/// Hook handler callback.
pub type HookHandler = Arc<dyn Fn(&mut HookContext) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum HookKind {
    Action,
    Filter,
}

#[derive(Clone)]
struct HookEntry {
    plugin: String,
    handler: HookHandler,
    priority: i32,
    kind: HookKind,
}

/// Thread-safe registry and dispatcher for actions and filters.
pub struct HookManager {
    hooks: RwLock<HashMap<String, Vec<HookEntry>>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HookManager {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            metrics: None,
        }
    }

    /// A manager that counts handler invocations per plugin.
    pub fn with_metrics(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            metrics: Some(metrics),
        }
    }

    /// Register an action handler for an event.
    pub fn register<F>(&self, event: &str, plugin: &str, priority: i32, handler: F)
    where
        F: Fn(&mut HookContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(event, plugin, priority, Arc::new(handler), HookKind::Action);
    }

    /// Register a filter handler for an event.
    pub fn register_filter<F>(&self, event: &str, plugin: &str, priority: i32, handler: F)
    where
        F: Fn(&mut HookContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(event, plugin, priority, Arc::new(handler), HookKind::Filter);
    }

    fn insert(
        &self,
        event: &str,
        plugin: &str,
        priority: i32,
        handler: HookHandler,
        kind: HookKind,
    ) {
        let mut hooks = self.hooks.write();
        let entries = hooks.entry(event.to_string()).or_default();
        entries.push(HookEntry {
            plugin: plugin.to_string(),
            handler,
            priority,
            kind,
        });
        // Stable re-sort keeps registration order on equal priorities.
        entries.sort_by_key(|e| e.priority);
    }

    /// Run every action registered for an event, in priority order.
    ///
    /// A handler error or panic is logged and does not stop the remaining
    /// handlers.
    pub fn do_action(&self, event: &str, data: &Value) {
        let entries = self.snapshot(event, HookKind::Action);

        for entry in entries {
            self.count_invocation(&entry.plugin);
            let mut ctx = HookContext::new(event, data.clone());
            match catch_unwind(AssertUnwindSafe(|| (entry.handler)(&mut ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(event, plugin = %entry.plugin, error = %e, "hook handler failed");
                }
                Err(panic) => {
                    error!(
                        event,
                        plugin = %entry.plugin,
                        panic = %panic_message(&panic),
                        "hook handler panicked"
                    );
                }
            }
        }
    }

    /// Run every filter registered for an event, threading the value through
    /// the chain in priority order.
    ///
    /// A filter that errors (or panics) has its replacement discarded; the
    /// next filter receives the value as it stood before the failing one.
    pub fn apply(&self, event: &str, data: Value) -> Value {
        let entries = self.snapshot(event, HookKind::Filter);

        let mut current = data;
        for entry in entries {
            self.count_invocation(&entry.plugin);
            let mut ctx = HookContext::new(event, current.clone());
            match catch_unwind(AssertUnwindSafe(|| (entry.handler)(&mut ctx))) {
                Ok(Ok(())) => current = ctx.into_output(),
                Ok(Err(e)) => {
                    error!(event, plugin = %entry.plugin, error = %e, "filter failed");
                }
                Err(panic) => {
                    error!(
                        event,
                        plugin = %entry.plugin,
                        panic = %panic_message(&panic),
                        "filter panicked"
                    );
                }
            }
        }
        current
    }

    /// Remove every handler a plugin registered, across all events.
    pub fn unregister(&self, plugin: &str) {
        let mut hooks = self.hooks.write();
        for entries in hooks.values_mut() {
            entries.retain(|e| e.plugin != plugin);
        }
        hooks.retain(|_, entries| !entries.is_empty());
    }

    /// Count of handlers registered for an event (both kinds).
    pub fn handler_count(&self, event: &str) -> usize {
        self.hooks.read().get(event).map_or(0, Vec::len)
    }

    fn count_invocation(&self, plugin: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_hook(plugin);
        }
    }

    fn snapshot(&self, event: &str, kind: HookKind) -> Vec<HookEntry> {
        let hooks = self.hooks.read();
        hooks
            .get(event)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.kind == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn actions_run_in_priority_order() {
        let hm = HookManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for (plugin, priority) in [("c", 30), ("a", 10), ("b", 20)] {
            let seen = seen.clone();
            let name = plugin.to_string();
            hm.register("post_saved", plugin, priority, move |_ctx| {
                seen.lock().unwrap().push(name.clone());
                Ok(())
            });
        }

        hm.do_action("post_saved", &json!({}));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn equal_priorities_keep_registration_order() {
        let hm = HookManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for plugin in ["first", "second", "third"] {
            let seen = seen.clone();
            let name = plugin.to_string();
            hm.register("tied", plugin, 10, move |_ctx| {
                seen.lock().unwrap().push(name.clone());
                Ok(())
            });
        }

        hm.do_action("tied", &json!({}));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn action_error_does_not_stop_siblings() {
        let hm = HookManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        hm.register("evt", "bad", 10, |_ctx| anyhow::bail!("boom"));
        let seen2 = seen.clone();
        hm.register("evt", "good", 20, move |_ctx| {
            seen2.lock().unwrap().push("good");
            Ok(())
        });

        hm.do_action("evt", &json!({}));
        assert_eq!(*seen.lock().unwrap(), vec!["good"]);
    }

    #[test]
    fn filters_chain_in_priority_order() {
        let hm = HookManager::new();

        hm.register_filter("render", "suffix_a", 10, |ctx| {
            let s = ctx.input.as_str().unwrap_or_default();
            ctx.set_output(json!(format!("{s}+a")));
            Ok(())
        });
        hm.register_filter("render", "suffix_b", 20, |ctx| {
            let s = ctx.input.as_str().unwrap_or_default();
            ctx.set_output(json!(format!("{s}+b")));
            Ok(())
        });

        let out = hm.apply("render", json!("base"));
        assert_eq!(out, json!("base+a+b"));
    }

    #[test]
    fn failing_filter_passes_pre_filter_value_onward() {
        let hm = HookManager::new();

        hm.register_filter("render", "broken", 10, |ctx| {
            ctx.set_output(json!("poisoned"));
            anyhow::bail!("filter failed")
        });
        hm.register_filter("render", "suffix", 20, |ctx| {
            let s = ctx.input.as_str().unwrap_or_default();
            ctx.set_output(json!(format!("{s}+ok")));
            Ok(())
        });

        let out = hm.apply("render", json!("base"));
        assert_eq!(out, json!("base+ok"));
    }

    #[test]
    fn panicking_filter_is_contained() {
        let hm = HookManager::new();

        hm.register_filter("render", "panics", 10, |_ctx| panic!("oops"));
        hm.register_filter("render", "suffix", 20, |ctx| {
            let s = ctx.input.as_str().unwrap_or_default();
            ctx.set_output(json!(format!("{s}+ok")));
            Ok(())
        });

        let out = hm.apply("render", json!("base"));
        assert_eq!(out, json!("base+ok"));
    }

    #[test]
    fn unregister_removes_all_entries_for_plugin() {
        let hm = HookManager::new();
        hm.register("a", "p1", 10, |_| Ok(()));
        hm.register("b", "p1", 10, |_| Ok(()));
        hm.register("b", "p2", 10, |_| Ok(()));

        hm.unregister("p1");
        assert_eq!(hm.handler_count("a"), 0);
        assert_eq!(hm.handler_count("b"), 1);
    }

    #[test]
    fn handler_may_reenter_the_manager() {
        let hm = Arc::new(HookManager::new());
        let hm2 = hm.clone();
        let fired = Arc::new(Mutex::new(false));
        let fired2 = fired.clone();

        hm.register("outer", "p1", 10, move |_ctx| {
            // Registering from inside a handler must not deadlock.
            let fired3 = fired2.clone();
            hm2.register("inner", "p1", 10, move |_| {
                *fired3.lock().unwrap() = true;
                Ok(())
            });
            Ok(())
        });

        hm.do_action("outer", &json!({}));
        hm.do_action("inner", &json!({}));
        assert!(*fired.lock().unwrap());
    }
}
