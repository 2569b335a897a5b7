//! Plugin capability contract and execution context.
//!
//! Every plugin implements [`Plugin`]. Optional capabilities (lifecycle
//! transitions, hooks, schedules, rate limits, event subscriptions, health)
//! are separate traits surfaced through accessor methods, so the runtime
//! performs an explicit capability check before invoking each one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;

use crate::events::EventBus;
use crate::hooks::HookManager;
use crate::ratelimit::RateLimiter;
use crate::registry::RouteTable;
use crate::scheduler::Scheduler;

/// Lifecycle status of a plugin known to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Disabled,
    Enabled,
    Error,
}

impl PluginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::Error => "error",
        }
    }
}

/// A typed setting value after defaults and schema conversion are applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl SettingValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Context handed to a plugin's `initialize`.
///
/// Carries the host's store and cache handles, the flattened typed settings
/// map with declared defaults applied, and the plugin's filesystem base path
/// (empty for built-ins).
#[derive(Clone)]
pub struct PluginContext {
    /// Relational store handle; absent when the host runs storage-less.
    pub db: Option<PgPool>,
    /// Cache / broker handle.
    pub cache: Option<redis::Client>,
    /// Flattened typed settings with defaults applied.
    pub settings: HashMap<String, SettingValue>,
    /// Plugin directory; empty for built-ins.
    pub base_path: PathBuf,
    /// Plugin machine name, for log scoping.
    pub plugin: String,
}

impl PluginContext {
    /// A tracing span scoped to this plugin, for instrumenting plugin work.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("plugin", name = %self.plugin)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(SettingValue::as_str)
    }

    pub fn setting_number(&self, key: &str) -> Option<f64> {
        self.settings.get(key).and_then(SettingValue::as_number)
    }

    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(SettingValue::as_bool)
    }
}

/// The capability contract every plugin implements.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Machine name; must match the manifest's `name`.
    fn name(&self) -> &str;

    /// Called on every enable, before routes mount.
    async fn initialize(&self, ctx: &PluginContext) -> anyhow::Result<()>;

    /// Register route handlers. Called once per process lifetime; the
    /// resulting routes cannot be unmounted.
    fn register_routes(&self, routes: &mut RouteTable);

    /// Called on disable; failures are logged, never blocking.
    async fn shutdown(&self) -> anyhow::Result<()>;

    /// Install/uninstall/enable/disable transition callbacks.
    fn lifecycle(&self) -> Option<&dyn LifecycleHooks> {
        None
    }

    /// Action/filter hook registration.
    fn hooks(&self) -> Option<&dyn HookAware> {
        None
    }

    /// Recurring background jobs.
    fn schedules(&self) -> Option<&dyn Schedulable> {
        None
    }

    /// Per-plugin request budget.
    fn rate_limit(&self) -> Option<&dyn RateLimitAware> {
        None
    }

    /// Event-topic subscriptions.
    fn events(&self) -> Option<&dyn EventAware> {
        None
    }

    /// Liveness probe for the admin health view.
    fn health(&self) -> Option<&dyn HealthCheckable> {
        None
    }
}

/// Optional transition callbacks, each invoked exactly once per transition.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn on_install(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_uninstall(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_enable(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_disable(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Implemented by plugins that register action/filter hooks.
pub trait HookAware: Send + Sync {
    fn register_hooks(&self, hooks: &HookManager);
}

/// Implemented by plugins that run recurring background jobs.
pub trait Schedulable: Send + Sync {
    fn register_schedules(&self, scheduler: &Scheduler);
}

/// Implemented by plugins that want a request budget on their routes.
pub trait RateLimitAware: Send + Sync {
    fn configure_rate_limit(&self, limiter: &RateLimiter);
}

/// Implemented by plugins that subscribe to event topics.
pub trait EventAware: Send + Sync {
    fn register_events(&self, bus: &Arc<EventBus>);
}

/// Implemented by plugins that expose a liveness probe.
pub trait HealthCheckable: Send + Sync {
    fn health_check(&self) -> anyhow::Result<()>;
}

/// Health-check result for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct PluginHealth {
    pub name: String,
    /// One of: healthy, unhealthy, disabled, unknown.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
