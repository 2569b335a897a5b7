//! Live plugin state and the enable/disable engine.
//!
//! The runtime manager owns every shared component (hooks, events,
//! scheduler, rate limiter, routes, metrics) plus one entry per registered
//! plugin. Entries are created at registration and never destroyed, only
//! re-statused. All durable state lives with the lifecycle orchestrator;
//! everything here resets with the process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::events::EventBus;
use crate::hooks::HookManager;
use crate::manifest::Manifest;
use crate::metrics::MetricsCollector;
use crate::plugin::{Plugin, PluginContext, PluginHealth, PluginStatus, SettingValue};
use crate::ratelimit::RateLimiter;
use crate::registry::{RouteRegistry, RouteTable};
use crate::sandbox::{self, SandboxConfig};
use crate::scheduler::Scheduler;

/// Runtime tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub sandbox: SandboxConfig,
    /// Scheduler wakeup cadence; coarser than the finest task interval.
    pub scheduler_cadence: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            scheduler_cadence: Duration::from_secs(30),
        }
    }
}

struct RuntimePlugin {
    manifest: Manifest,
    base_path: PathBuf,
    instance: Arc<dyn Plugin>,
    builtin: bool,
    status: PluginStatus,
    last_error: Option<String>,
    registered_at: DateTime<Utc>,
    status_changed_at: DateTime<Utc>,
}

/// Read-only plugin view for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub builtin: bool,
    pub status: PluginStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
}

/// Owns live plugin instances and the shared extension components.
pub struct RuntimeManager {
    hooks: Arc<HookManager>,
    events: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
    rate_limiter: Arc<RateLimiter>,
    routes: Arc<RouteRegistry>,
    metrics: Arc<MetricsCollector>,
    sandbox: SandboxConfig,
    db: Option<PgPool>,
    cache: Option<redis::Client>,
    plugins: RwLock<HashMap<String, RuntimePlugin>>,
}

impl RuntimeManager {
    pub fn new(db: Option<PgPool>, cache: Option<redis::Client>, config: RuntimeConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        Self {
            hooks: Arc::new(HookManager::with_metrics(Arc::clone(&metrics))),
            events: Arc::new(EventBus::with_metrics(Arc::clone(&metrics))),
            scheduler: Arc::new(Scheduler::new(config.scheduler_cadence)),
            rate_limiter: Arc::new(RateLimiter::new(cache.clone())),
            routes: Arc::new(RouteRegistry::new()),
            metrics,
            sandbox: config.sandbox,
            db,
            cache,
            plugins: RwLock::new(HashMap::new()),
        }
    }

    pub fn hooks(&self) -> &Arc<HookManager> {
        &self.hooks
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn routes(&self) -> &Arc<RouteRegistry> {
        &self.routes
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn sandbox(&self) -> SandboxConfig {
        self.sandbox
    }

    /// Register a plugin instance, status disabled. Idempotent by name.
    pub fn register(
        &self,
        manifest: Manifest,
        base_path: PathBuf,
        instance: Arc<dyn Plugin>,
        builtin: bool,
    ) {
        let mut plugins = self.plugins.write();
        if plugins.contains_key(&manifest.name) {
            debug!(plugin = %manifest.name, "already registered");
            return;
        }
        let now = Utc::now();
        debug!(plugin = %manifest.name, version = %manifest.version, "plugin registered");
        plugins.insert(
            manifest.name.clone(),
            RuntimePlugin {
                manifest,
                base_path,
                instance,
                builtin,
                status: PluginStatus::Disabled,
                last_error: None,
                registered_at: now,
                status_changed_at: now,
            },
        );
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.plugins.read().get(name).map(|p| p.status)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.status(name) == Some(PluginStatus::Enabled)
    }

    pub fn manifest(&self, name: &str) -> Option<Manifest> {
        self.plugins.read().get(name).map(|p| p.manifest.clone())
    }

    /// Manifests of every currently-enabled plugin.
    pub fn enabled_manifests(&self) -> Vec<Manifest> {
        self.plugins
            .read()
            .values()
            .filter(|p| p.status == PluginStatus::Enabled)
            .map(|p| p.manifest.clone())
            .collect()
    }

    /// Enable a plugin: initialize it under the sandbox, mount its routes on
    /// first enable, wire its capabilities. No-op when already enabled.
    ///
    /// On initialization failure the entry flips to error, the message is
    /// kept, and the error is returned rather than swallowed.
    pub async fn enable(
        &self,
        name: &str,
        settings: HashMap<String, SettingValue>,
    ) -> Result<(), PluginError> {
        let (instance, base_path) = {
            let plugins = self.plugins.read();
            let entry = plugins
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            if entry.status == PluginStatus::Enabled {
                debug!(plugin = name, "already enabled");
                return Ok(());
            }
            (Arc::clone(&entry.instance), entry.base_path.clone())
        };

        let ctx = PluginContext {
            db: self.db.clone(),
            cache: self.cache.clone(),
            settings,
            base_path,
            plugin: name.to_string(),
        };

        let init = sandbox::safe_call_future(name, instance.initialize(&ctx)).await;
        if let Err(e) = init {
            let details = e.to_string();
            self.set_status(name, PluginStatus::Error, Some(&details));
            return Err(PluginError::InitializationFailed {
                plugin: name.to_string(),
                details,
            });
        }

        // Routes mount at most once per process lifetime; a re-enable after
        // a prior mount only flips status.
        if !self.routes.is_mounted(name) {
            let mut table = RouteTable::new();
            instance.register_routes(&mut table);
            self.routes.mount(name, table);
        }

        if let Some(hook_aware) = instance.hooks() {
            hook_aware.register_hooks(&self.hooks);
        }
        if let Some(schedulable) = instance.schedules() {
            schedulable.register_schedules(&self.scheduler);
        }
        if let Some(limited) = instance.rate_limit() {
            limited.configure_rate_limit(&self.rate_limiter);
        }
        if let Some(event_aware) = instance.events() {
            event_aware.register_events(&self.events);
        }

        self.set_status(name, PluginStatus::Enabled, None);
        info!(plugin = name, "plugin enabled");
        Ok(())
    }

    /// Disable a plugin: best-effort shutdown, then detach its hooks, tasks,
    /// subscriptions, and budget. Routes stay mounted; the dispatcher
    /// rejects them by live status. No-op when already disabled.
    pub async fn disable(&self, name: &str) -> Result<(), PluginError> {
        let instance = {
            let plugins = self.plugins.read();
            let entry = plugins
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            if entry.status == PluginStatus::Disabled {
                debug!(plugin = name, "already disabled");
                return Ok(());
            }
            Arc::clone(&entry.instance)
        };

        if let Err(e) = sandbox::safe_call_future(name, instance.shutdown()).await {
            warn!(plugin = name, error = %e, "plugin shutdown failed, disabling anyway");
        }

        self.hooks.unregister(name);
        self.scheduler.unregister(name);
        self.events.unsubscribe(name);
        self.rate_limiter.remove(name);

        self.set_status(name, PluginStatus::Disabled, None);
        info!(plugin = name, "plugin disabled");
        Ok(())
    }

    /// Disable every enabled plugin, continuing past individual failures.
    pub async fn shutdown_all(&self) {
        let enabled: Vec<String> = {
            let plugins = self.plugins.read();
            plugins
                .iter()
                .filter(|(_, p)| p.status == PluginStatus::Enabled)
                .map(|(name, _)| name.clone())
                .collect()
        };

        for name in enabled {
            if let Err(e) = self.disable(&name).await {
                warn!(plugin = %name, error = %e, "shutdown-time disable failed");
            }
        }
    }

    /// Optional transition callbacks, run under the sandbox. Absence of the
    /// capability is not an error; a callback failure is logged only.
    pub async fn run_transition(&self, name: &str, transition: Transition) {
        let instance = {
            let plugins = self.plugins.read();
            plugins.get(name).map(|p| Arc::clone(&p.instance))
        };
        let Some(instance) = instance else { return };
        let Some(lifecycle) = instance.lifecycle() else {
            return;
        };

        let result = match transition {
            Transition::Install => sandbox::safe_call_future(name, lifecycle.on_install()).await,
            Transition::Uninstall => {
                sandbox::safe_call_future(name, lifecycle.on_uninstall()).await
            }
            Transition::Enable => sandbox::safe_call_future(name, lifecycle.on_enable()).await,
            Transition::Disable => sandbox::safe_call_future(name, lifecycle.on_disable()).await,
        };
        if let Err(e) = result {
            warn!(plugin = name, ?transition, error = %e, "transition callback failed");
        }
    }

    /// Per-plugin health report.
    pub fn health(&self) -> Vec<PluginHealth> {
        let snapshot: Vec<(String, PluginStatus, Arc<dyn Plugin>)> = {
            let plugins = self.plugins.read();
            plugins
                .iter()
                .map(|(name, p)| (name.clone(), p.status, Arc::clone(&p.instance)))
                .collect()
        };

        let mut report: Vec<PluginHealth> = snapshot
            .into_iter()
            .map(|(name, status, instance)| match status {
                PluginStatus::Enabled => match instance.health() {
                    Some(probe) => match sandbox::safe_call(&name, || probe.health_check()) {
                        Ok(()) => PluginHealth {
                            name,
                            status: "healthy".into(),
                            message: None,
                        },
                        Err(e) => PluginHealth {
                            name,
                            status: "unhealthy".into(),
                            message: Some(e.to_string()),
                        },
                    },
                    None => PluginHealth {
                        name,
                        status: "unknown".into(),
                        message: None,
                    },
                },
                PluginStatus::Disabled => PluginHealth {
                    name,
                    status: "disabled".into(),
                    message: None,
                },
                PluginStatus::Error => PluginHealth {
                    name,
                    status: "unhealthy".into(),
                    message: None,
                },
            })
            .collect();
        report.sort_by(|a, b| a.name.cmp(&b.name));
        report
    }

    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        let plugins = self.plugins.read();
        plugins.get(name).map(|p| Self::view(name, p))
    }

    /// All registered plugins, sorted by name.
    pub fn list(&self) -> Vec<PluginInfo> {
        let plugins = self.plugins.read();
        let mut infos: Vec<PluginInfo> = plugins
            .iter()
            .map(|(name, p)| Self::view(name, p))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    fn view(name: &str, p: &RuntimePlugin) -> PluginInfo {
        PluginInfo {
            name: name.to_string(),
            version: p.manifest.version.clone(),
            builtin: p.builtin,
            status: p.status,
            last_error: p.last_error.clone(),
            registered_at: p.registered_at,
            status_changed_at: p.status_changed_at,
        }
    }

    fn set_status(&self, name: &str, status: PluginStatus, error: Option<&str>) {
        let mut plugins = self.plugins.write();
        if let Some(entry) = plugins.get_mut(name) {
            entry.status = status;
            entry.last_error = error.map(str::to_string);
            entry.status_changed_at = Utc::now();
        }
    }
}

/// Lifecycle transition selector for optional callbacks.
#[derive(Debug, Clone, Copy)]
pub enum Transition {
    Install,
    Uninstall,
    Enable,
    Disable,
}
