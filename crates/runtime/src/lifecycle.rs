//! Install/enable/disable/uninstall orchestration.
//!
//! The orchestrator is the only writer of durable plugin state. Every
//! transition is guarded (host compatibility, dependencies, bidirectional
//! conflicts, reverse dependents), persisted to the installation record,
//! and appended to the audit trail, so operational history survives
//! restarts. Transitions on different plugins may run concurrently; the
//! check-then-act sequence on one name is not a single transaction.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::PluginError;
use crate::loader::{DiscoveredPlugin, Loader};
use crate::manifest::Manifest;
use crate::metrics::PluginMetrics;
use crate::plugin::{PluginHealth, PluginStatus};
use crate::ratelimit::RateLimitInfo;
use crate::registry::RouteInfo;
use crate::runtime::{PluginInfo, RuntimeManager, Transition};
use crate::scheduler::TaskInfo;
use crate::settings;
use crate::store::{AuditEvent, InstallRecord, PermissionRecord, Stores};
use crate::version;

/// Dashboard aggregation of every component's read view.
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub plugins: Vec<PluginInfo>,
    pub health: Vec<PluginHealth>,
    pub routes: Vec<RouteInfo>,
    pub tasks: Vec<TaskInfo>,
    pub rate_limits: Vec<RateLimitInfo>,
    pub subscriptions: HashMap<String, Vec<String>>,
    pub metrics: Vec<PluginMetrics>,
    /// Empty when the audit store is unreachable.
    pub recent_events: Vec<AuditEvent>,
}

/// Drives plugin lifecycle transitions against runtime and stores.
pub struct PluginLifecycle {
    loader: Arc<Loader>,
    runtime: Arc<RuntimeManager>,
    stores: Stores,
    host_version: String,
}

impl PluginLifecycle {
    pub fn new(
        loader: Arc<Loader>,
        runtime: Arc<RuntimeManager>,
        stores: Stores,
        host_version: &str,
    ) -> Self {
        Self {
            loader,
            runtime,
            stores,
            host_version: host_version.to_string(),
        }
    }

    pub fn runtime(&self) -> &Arc<RuntimeManager> {
        &self.runtime
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// The merged catalog; degrades to not-installed rows when the
    /// installation store is unreachable.
    pub async fn catalog(&self) -> Catalog {
        let (discovered, failures) = self.loader.discover();
        let records = match self.stores.installs.list().await {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(error = %e, "installation store unreachable");
                None
            }
        };
        Catalog::build(&discovered, &failures, records.as_deref())
    }

    /// Install a cataloged plugin and enable it in one step.
    ///
    /// Guards run before the record is created, so a failed guard leaves no
    /// trace. A failed enable keeps the record with status error; the admin
    /// can retry with `enable` once the cause is fixed.
    pub async fn install(&self, name: &str, actor: &str) -> Result<(), PluginError> {
        let discovered = self.require_discovered(name)?;
        if self.stores.installs.get(name).await?.is_some() {
            return Err(PluginError::AlreadyInstalled(name.to_string()));
        }

        self.check_host(&discovered.manifest)?;
        self.check_dependencies(&discovered.manifest).await?;
        self.check_conflicts(&discovered.manifest).await?;

        self.ensure_registered(&discovered)?;
        self.stores
            .installs
            .upsert(&InstallRecord::new(name, &discovered.manifest.version))
            .await?;

        if let Err(e) = self.activate(&discovered).await {
            let details = e.to_string();
            self.stores
                .installs
                .set_status(name, PluginStatus::Error, Some(&details))
                .await?;
            self.audit(name, "error", actor, Some(details)).await;
            return Err(e);
        }

        self.stores
            .installs
            .set_status(name, PluginStatus::Enabled, None)
            .await?;
        self.runtime.run_transition(name, Transition::Install).await;
        self.audit(name, "installed", actor, None).await;
        self.announce(name, "installed");
        info!(plugin = name, actor, "plugin installed");
        Ok(())
    }

    /// Enable an installed plugin. No-op when already enabled. Re-checks
    /// host compatibility and conflicts; dependency guards ran at install
    /// time. The host check repeats here because the host may have been
    /// restarted at a different version since install.
    pub async fn enable(&self, name: &str, actor: &str) -> Result<(), PluginError> {
        let record = self.require_record(name).await?;
        if record.status == PluginStatus::Enabled && self.runtime.is_enabled(name) {
            return Ok(());
        }

        let discovered = self.require_discovered(name)?;
        self.check_host(&discovered.manifest)?;
        self.check_conflicts(&discovered.manifest).await?;
        self.ensure_registered(&discovered)?;

        if let Err(e) = self.activate(&discovered).await {
            let details = e.to_string();
            self.stores
                .installs
                .set_status(name, PluginStatus::Error, Some(&details))
                .await?;
            self.audit(name, "error", actor, Some(details)).await;
            return Err(e);
        }

        self.stores
            .installs
            .set_status(name, PluginStatus::Enabled, None)
            .await?;
        self.runtime.run_transition(name, Transition::Enable).await;
        self.audit(name, "enabled", actor, None).await;
        self.announce(name, "enabled");
        Ok(())
    }

    /// Disable an installed plugin. No-op when already disabled; blocked
    /// while another enabled plugin depends on this one.
    pub async fn disable(&self, name: &str, actor: &str) -> Result<(), PluginError> {
        let record = self.require_record(name).await?;
        if record.status == PluginStatus::Disabled {
            return Ok(());
        }

        self.check_dependents(name).await?;

        self.runtime.run_transition(name, Transition::Disable).await;
        self.runtime.disable(name).await?;
        self.stores
            .installs
            .set_status(name, PluginStatus::Disabled, None)
            .await?;
        self.audit(name, "disabled", actor, None).await;
        self.announce(name, "disabled");
        Ok(())
    }

    /// Uninstall a plugin: reverse-dependents guard, best-effort disable,
    /// then remove settings, permissions, counters, and the record.
    pub async fn uninstall(&self, name: &str, actor: &str) -> Result<(), PluginError> {
        let record = self.require_record(name).await?;
        self.check_dependents(name).await?;

        self.runtime.run_transition(name, Transition::Uninstall).await;
        if record.status == PluginStatus::Enabled {
            if let Err(e) = self.runtime.disable(name).await {
                warn!(plugin = name, error = %e, "disable during uninstall failed");
            }
        }

        self.stores.settings.delete_all(name).await?;
        self.stores.permissions.delete_all(name).await?;
        self.stores.installs.delete(name).await?;
        self.runtime.metrics().reset(name);

        self.audit(name, "uninstalled", actor, None).await;
        self.announce(name, "uninstalled");
        info!(plugin = name, actor, "plugin uninstalled");
        Ok(())
    }

    /// Re-enable every persisted-enabled plugin at process start. One
    /// failure flips that plugin to error and never halts the rest.
    pub async fn boot(&self) -> anyhow::Result<()> {
        let (discovered, _) = self.loader.discover();
        for plugin in &discovered {
            if let Err(e) = self.ensure_registered(plugin) {
                warn!(plugin = %plugin.manifest.name, error = %e, "registration skipped");
            }
        }

        let records = self.stores.installs.list().await?;
        let mut enabled = 0usize;
        for record in records.iter().filter(|r| r.status == PluginStatus::Enabled) {
            let Some(plugin) = discovered.iter().find(|p| p.manifest.name == record.name)
            else {
                warn!(plugin = %record.name, "enabled plugin has no files, flipping to error");
                self.stores
                    .installs
                    .set_status(&record.name, PluginStatus::Error, Some("plugin files missing"))
                    .await?;
                continue;
            };

            // A restart may have changed the host version out from under an
            // installed plugin.
            if let Err(e) = self.check_host(&plugin.manifest) {
                warn!(plugin = %record.name, error = %e, "host no longer compatible");
                self.stores
                    .installs
                    .set_status(&record.name, PluginStatus::Error, Some(&e.to_string()))
                    .await?;
                self.audit(&record.name, "error", "system", Some(e.to_string()))
                    .await;
                continue;
            }

            match self.activate(plugin).await {
                Ok(()) => enabled += 1,
                Err(e) => {
                    warn!(plugin = %record.name, error = %e, "boot enable failed");
                    self.stores
                        .installs
                        .set_status(&record.name, PluginStatus::Error, Some(&e.to_string()))
                        .await?;
                    self.audit(&record.name, "error", "system", Some(e.to_string()))
                        .await;
                }
            }
        }
        info!(enabled, total = records.len(), "boot enable pass finished");
        Ok(())
    }

    /// Validate and persist settings, then restart the plugin so the new
    /// values take effect, when it is enabled.
    pub async fn update_settings(
        &self,
        name: &str,
        values: &HashMap<String, String>,
        actor: &str,
    ) -> Result<(), PluginError> {
        let discovered = self.require_discovered(name)?;
        settings::validate_all(&discovered.manifest, values)?;

        for (key, value) in values {
            self.stores.settings.set(name, key, value).await?;
        }
        self.audit(
            name,
            "config_changed",
            actor,
            Some(format!("{} key(s) updated", values.len())),
        )
        .await;

        if self.runtime.is_enabled(name) {
            self.runtime.disable(name).await?;
            if let Err(e) = self.activate(&discovered).await {
                let details = e.to_string();
                self.stores
                    .installs
                    .set_status(name, PluginStatus::Error, Some(&details))
                    .await?;
                self.audit(name, "error", actor, Some(details)).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Raw stored settings merged over declared defaults, as strings for the
    /// admin form.
    pub async fn current_settings(
        &self,
        name: &str,
    ) -> Result<HashMap<String, String>, PluginError> {
        let discovered = self.require_discovered(name)?;
        let mut values: HashMap<String, String> = discovered
            .manifest
            .settings
            .iter()
            .filter_map(|decl| {
                decl.default
                    .as_ref()
                    .map(|d| (decl.key.clone(), toml_value_string(d)))
            })
            .collect();
        values.extend(self.stores.settings.get_all(name).await?);
        Ok(values)
    }

    /// Recent audit entries, newest first.
    pub async fn events(
        &self,
        plugin: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, PluginError> {
        Ok(self.stores.events.recent(plugin, limit).await?)
    }

    /// Dashboard aggregation; store failures degrade to empty sections.
    pub async fn overview(&self) -> Overview {
        let recent_events = self
            .stores
            .events
            .recent(None, 20)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "audit store unreachable for overview");
                Vec::new()
            });

        Overview {
            plugins: self.runtime.list(),
            health: self.runtime.health(),
            routes: self.runtime.routes().routes(),
            tasks: self.runtime.scheduler().tasks(),
            rate_limits: self.runtime.rate_limiter().limits(),
            subscriptions: self.runtime.events().subscriptions(),
            metrics: self.runtime.metrics().snapshot(),
            recent_events,
        }
    }

    /// Initialize the plugin with its effective settings and sync declared
    /// permissions.
    async fn activate(&self, plugin: &DiscoveredPlugin) -> Result<(), PluginError> {
        let name = &plugin.manifest.name;
        let stored = self.stores.settings.get_all(name).await.unwrap_or_else(|e| {
            warn!(plugin = %name, error = %e, "setting store unreachable, using defaults");
            HashMap::new()
        });
        let effective = settings::effective_settings(&plugin.manifest, &stored);

        self.runtime.enable(name, effective).await?;

        let declared: Vec<PermissionRecord> = plugin
            .manifest
            .permissions
            .iter()
            .map(|p| PermissionRecord {
                plugin: name.clone(),
                id: p.id.clone(),
                label: p.label.clone(),
                min_level: 0,
            })
            .collect();
        if !declared.is_empty() {
            self.stores.permissions.sync(name, &declared).await?;
        }
        Ok(())
    }

    fn require_discovered(&self, name: &str) -> Result<DiscoveredPlugin, PluginError> {
        self.loader
            .find(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    async fn require_record(&self, name: &str) -> Result<InstallRecord, PluginError> {
        self.stores
            .installs
            .get(name)
            .await?
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    fn ensure_registered(&self, plugin: &DiscoveredPlugin) -> Result<(), PluginError> {
        if self.runtime.manifest(&plugin.manifest.name).is_some() {
            return Ok(());
        }
        let Some(instance) = &plugin.instance else {
            return Err(PluginError::InitializationFailed {
                plugin: plugin.manifest.name.clone(),
                details: "no implementation registered for this plugin".into(),
            });
        };
        self.runtime.register(
            plugin.manifest.clone(),
            plugin.base_path.clone(),
            Arc::clone(instance),
            plugin.builtin,
        );
        Ok(())
    }

    fn check_host(&self, manifest: &Manifest) -> Result<(), PluginError> {
        version::check_range(&self.host_version, &manifest.requires.host)
    }

    async fn check_dependencies(&self, manifest: &Manifest) -> Result<(), PluginError> {
        for dep in &manifest.requires.plugins {
            let unsatisfied = |reason: String| PluginError::DependencyUnsatisfied {
                plugin: manifest.name.clone(),
                dependency: dep.name.clone(),
                reason,
            };

            let record = self
                .stores
                .installs
                .get(&dep.name)
                .await?
                .ok_or_else(|| unsatisfied("not installed".into()))?;
            if record.status != PluginStatus::Enabled {
                return Err(unsatisfied("not enabled".into()));
            }
            if !dep.version.is_empty() {
                version::check_range(&record.version, &dep.version)
                    .map_err(|e| unsatisfied(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Conflicts are checked in both directions against every enabled
    /// plugin: the target's declarations and theirs.
    async fn check_conflicts(&self, manifest: &Manifest) -> Result<(), PluginError> {
        let enabled = self.runtime.enabled_manifests();
        for other in &enabled {
            if other.name == manifest.name {
                continue;
            }
            if manifest.conflicts.contains(&other.name)
                || other.conflicts.contains(&manifest.name)
            {
                return Err(PluginError::ConflictDetected {
                    plugin: manifest.name.clone(),
                    other: other.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Reverse-dependency guard for disable and uninstall.
    async fn check_dependents(&self, name: &str) -> Result<(), PluginError> {
        let dependents: Vec<String> = self
            .runtime
            .enabled_manifests()
            .into_iter()
            .filter(|m| m.name != name && m.depends_on(name))
            .map(|m| m.name)
            .collect();

        if dependents.is_empty() {
            Ok(())
        } else {
            Err(PluginError::DependentsBlocking {
                plugin: name.to_string(),
                dependents: dependents.join(", "),
            })
        }
    }

    async fn audit(&self, plugin: &str, action: &str, actor: &str, details: Option<String>) {
        let event = AuditEvent::now(plugin, action, actor, details);
        if let Err(e) = self.stores.events.append(&event).await {
            warn!(plugin, action, error = %e, "audit append failed");
        }
    }

    /// Broadcast the transition on the event bus for interested plugins.
    fn announce(&self, plugin: &str, action: &str) {
        self.runtime
            .events()
            .publish("host", &format!("plugin.{action}"), json!({ "plugin": plugin }));
    }
}

fn toml_value_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::CatalogStatus;
    use crate::loader::BuiltinRegistry;
    use crate::plugin::Plugin;
    use crate::runtime::tests::TestPlugin;
    use crate::runtime::RuntimeConfig;
    use std::path::Path;

    struct Fixture {
        lifecycle: PluginLifecycle,
    }

    fn manifest_toml(name: &str, deps: &[(&str, &str)], conflicts: &[&str]) -> String {
        let mut toml = format!(
            "name = \"{name}\"\nversion = \"1.0.0\"\ntitle = \"{name}\"\n"
        );
        if !conflicts.is_empty() {
            let list: Vec<String> = conflicts.iter().map(|c| format!("\"{c}\"")).collect();
            toml.push_str(&format!("conflicts = [{}]\n", list.join(", ")));
        }
        toml.push_str("\n[requires]\nhost = \">=1.0.0\"\n");
        if !deps.is_empty() {
            let list: Vec<String> = deps
                .iter()
                .map(|(n, v)| format!("{{ name = \"{n}\", version = \"{v}\" }}"))
                .collect();
            toml.push_str(&format!("plugins = [{}]\n", list.join(", ")));
        }
        toml
    }

    fn fixture(plugins: &[(Arc<TestPlugin>, String)]) -> Fixture {
        let builtins = Arc::new(BuiltinRegistry::new());
        for (instance, manifest_toml) in plugins {
            let manifest =
                Manifest::parse_str(manifest_toml, Path::new("plugin.toml")).unwrap();
            builtins
                .register(manifest, Arc::clone(instance) as Arc<dyn Plugin>)
                .unwrap();
        }

        let loader = Arc::new(Loader::new(builtins, None));
        let runtime = Arc::new(RuntimeManager::new(None, None, RuntimeConfig::default()));
        let lifecycle = PluginLifecycle::new(loader, runtime, Stores::in_memory(), "1.0.0");
        Fixture { lifecycle }
    }

    /// A lifecycle over shared stores with one plugin requiring host 2.x,
    /// for host up/downgrade scenarios.
    fn lifecycle_with_host(host: &str, stores: Stores) -> PluginLifecycle {
        let needy = TestPlugin::named("needy");
        let manifest = Manifest::parse_str(
            "name = \"needy\"\nversion = \"1.0.0\"\ntitle = \"needy\"\n\n[requires]\nhost = \">=2.0.0\"\n",
            Path::new("plugin.toml"),
        )
        .unwrap();
        let builtins = Arc::new(BuiltinRegistry::new());
        builtins.register(manifest, needy as Arc<dyn Plugin>).unwrap();

        let loader = Arc::new(Loader::new(builtins, None));
        let runtime = Arc::new(RuntimeManager::new(None, None, RuntimeConfig::default()));
        PluginLifecycle::new(loader, runtime, stores, host)
    }

    #[tokio::test]
    async fn install_unknown_plugin_is_not_found() {
        let f = fixture(&[]);
        let err = f.lifecycle.install("ghost", "admin").await.unwrap_err();
        assert!(matches!(err, PluginError::NotFound(_)));
    }

    #[tokio::test]
    async fn install_enables_and_audits() {
        let banner = TestPlugin::named("banner");
        let f = fixture(&[(Arc::clone(&banner), manifest_toml("banner", &[], &[]))]);

        f.lifecycle.install("banner", "admin").await.unwrap();

        assert!(f.lifecycle.runtime().is_enabled("banner"));
        let record = f.lifecycle.stores().installs.get("banner").await.unwrap().unwrap();
        assert_eq!(record.status, PluginStatus::Enabled);

        let events = f.lifecycle.events(Some("banner"), 10).await.unwrap();
        assert_eq!(events[0].action, "installed");
        assert_eq!(events[0].actor, "admin");

        let err = f.lifecycle.install("banner", "admin").await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyInstalled(_)));
    }

    #[tokio::test]
    async fn install_with_unmet_dependency_creates_no_record() {
        let banner = TestPlugin::named("banner");
        let f = fixture(&[(
            Arc::clone(&banner),
            manifest_toml("banner", &[("media", "^1.0.0")], &[]),
        )]);

        let err = f.lifecycle.install("banner", "admin").await.unwrap_err();
        assert!(matches!(err, PluginError::DependencyUnsatisfied { .. }));
        assert!(f.lifecycle.stores().installs.get("banner").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dependency_must_be_enabled_and_version_satisfying() {
        let media = TestPlugin::named("media");
        let banner = TestPlugin::named("banner");
        let f = fixture(&[
            (Arc::clone(&media), manifest_toml("media", &[], &[])),
            (
                Arc::clone(&banner),
                manifest_toml("banner", &[("media", "^2.0.0")], &[]),
            ),
        ]);

        f.lifecycle.install("media", "admin").await.unwrap();

        // media is 1.0.0, banner wants ^2.0.0.
        let err = f.lifecycle.install("banner", "admin").await.unwrap_err();
        assert!(matches!(err, PluginError::DependencyUnsatisfied { .. }));
    }

    #[tokio::test]
    async fn conflicts_block_in_either_direction() {
        // First pair: the installing plugin declares the conflict.
        let a = TestPlugin::named("a");
        let b = TestPlugin::named("b");
        let f = fixture(&[
            (Arc::clone(&a), manifest_toml("a", &[], &[])),
            (Arc::clone(&b), manifest_toml("b", &[], &["a"])),
        ]);
        f.lifecycle.install("a", "admin").await.unwrap();
        let err = f.lifecycle.install("b", "admin").await.unwrap_err();
        assert!(matches!(err, PluginError::ConflictDetected { .. }));

        // Second pair: the already-enabled plugin declared it.
        let c = TestPlugin::named("c");
        let d = TestPlugin::named("d");
        let f = fixture(&[
            (Arc::clone(&c), manifest_toml("c", &[], &["d"])),
            (Arc::clone(&d), manifest_toml("d", &[], &[])),
        ]);
        f.lifecycle.install("c", "admin").await.unwrap();
        let err = f.lifecycle.install("d", "admin").await.unwrap_err();
        assert!(matches!(err, PluginError::ConflictDetected { .. }));
    }

    #[tokio::test]
    async fn failed_enable_keeps_record_with_error_status() {
        let broken = TestPlugin::failing_init("broken");
        let f = fixture(&[(Arc::clone(&broken), manifest_toml("broken", &[], &[]))]);

        let err = f.lifecycle.install("broken", "admin").await.unwrap_err();
        assert!(matches!(err, PluginError::InitializationFailed { .. }));

        let record = f.lifecycle.stores().installs.get("broken").await.unwrap().unwrap();
        assert_eq!(record.status, PluginStatus::Error);
        assert!(record.last_error.as_ref().unwrap().contains("init refused"));

        let events = f.lifecycle.events(Some("broken"), 10).await.unwrap();
        assert_eq!(events[0].action, "error");
    }

    #[tokio::test]
    async fn enable_is_idempotent() {
        let banner = TestPlugin::named("banner");
        let f = fixture(&[(Arc::clone(&banner), manifest_toml("banner", &[], &[]))]);

        f.lifecycle.install("banner", "admin").await.unwrap();
        f.lifecycle.enable("banner", "admin").await.unwrap();

        use std::sync::atomic::Ordering;
        assert_eq!(banner.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disable_is_blocked_while_a_dependent_is_enabled() {
        let media = TestPlugin::named("media");
        let banner = TestPlugin::named("banner");
        let f = fixture(&[
            (Arc::clone(&media), manifest_toml("media", &[], &[])),
            (
                Arc::clone(&banner),
                manifest_toml("banner", &[("media", ">=1.0.0")], &[]),
            ),
        ]);

        f.lifecycle.install("media", "admin").await.unwrap();
        f.lifecycle.install("banner", "admin").await.unwrap();

        let err = f.lifecycle.disable("media", "admin").await.unwrap_err();
        assert!(matches!(err, PluginError::DependentsBlocking { .. }));

        // Removing the dependent unblocks the disable.
        f.lifecycle.disable("banner", "admin").await.unwrap();
        f.lifecycle.disable("media", "admin").await.unwrap();
        assert!(!f.lifecycle.runtime().is_enabled("media"));
    }

    #[tokio::test]
    async fn uninstall_removes_record_and_settings() {
        let banner = TestPlugin::named("banner");
        let f = fixture(&[(Arc::clone(&banner), manifest_toml("banner", &[], &[]))]);

        f.lifecycle.install("banner", "admin").await.unwrap();
        f.lifecycle
            .stores()
            .settings
            .set("banner", "key", "value")
            .await
            .unwrap();

        f.lifecycle.uninstall("banner", "admin").await.unwrap();

        assert!(f.lifecycle.stores().installs.get("banner").await.unwrap().is_none());
        assert!(f
            .lifecycle
            .stores()
            .settings
            .get_all("banner")
            .await
            .unwrap()
            .is_empty());
        let events = f.lifecycle.events(Some("banner"), 10).await.unwrap();
        assert_eq!(events[0].action, "uninstalled");

        // Reinstall works after uninstall.
        f.lifecycle.install("banner", "admin").await.unwrap();
    }

    #[tokio::test]
    async fn boot_tolerates_one_failing_plugin() {
        let good_a = TestPlugin::named("good_a");
        let good_b = TestPlugin::named("good_b");
        let broken = TestPlugin::failing_init("broken");
        let f = fixture(&[
            (Arc::clone(&good_a), manifest_toml("good_a", &[], &[])),
            (Arc::clone(&good_b), manifest_toml("good_b", &[], &[])),
            (Arc::clone(&broken), manifest_toml("broken", &[], &[])),
        ]);

        // Persisted-enabled records, as a previous process would leave them.
        for name in ["good_a", "good_b", "broken"] {
            let mut record = InstallRecord::new(name, "1.0.0");
            record.status = PluginStatus::Enabled;
            f.lifecycle.stores().installs.upsert(&record).await.unwrap();
        }

        f.lifecycle.boot().await.unwrap();

        assert!(f.lifecycle.runtime().is_enabled("good_a"));
        assert!(f.lifecycle.runtime().is_enabled("good_b"));
        let broken_record = f.lifecycle.stores().installs.get("broken").await.unwrap().unwrap();
        assert_eq!(broken_record.status, PluginStatus::Error);
    }

    #[tokio::test]
    async fn enable_rechecks_host_compatibility() {
        let stores = Stores::in_memory();
        let current = lifecycle_with_host("2.5.0", stores.clone());
        current.install("needy", "admin").await.unwrap();
        current.disable("needy", "admin").await.unwrap();

        // The host restarts at an older version over the same stores.
        let downgraded = lifecycle_with_host("1.0.0", stores);
        let err = downgraded.enable("needy", "admin").await.unwrap_err();
        assert!(matches!(err, PluginError::VersionMismatch { .. }));
        assert!(!downgraded.runtime().is_enabled("needy"));
    }

    #[tokio::test]
    async fn boot_flips_host_incompatible_plugins_to_error() {
        let stores = Stores::in_memory();
        let mut record = InstallRecord::new("needy", "1.0.0");
        record.status = PluginStatus::Enabled;
        stores.installs.upsert(&record).await.unwrap();

        let lifecycle = lifecycle_with_host("1.0.0", stores.clone());
        lifecycle.boot().await.unwrap();

        assert!(!lifecycle.runtime().is_enabled("needy"));
        let record = stores.installs.get("needy").await.unwrap().unwrap();
        assert_eq!(record.status, PluginStatus::Error);
        let events = lifecycle.events(Some("needy"), 10).await.unwrap();
        assert_eq!(events[0].action, "error");
        assert_eq!(events[0].actor, "system");
    }

    #[tokio::test]
    async fn failed_settings_restart_flips_record_to_error() {
        let flaky = TestPlugin::failing_init_after("flaky", 1);
        let toml = format!(
            "{}\n[[settings]]\nkey = \"mode\"\ntype = \"string\"\ndefault = \"plain\"\n",
            manifest_toml("flaky", &[], &[])
        );
        let f = fixture(&[(Arc::clone(&flaky), toml)]);
        f.lifecycle.install("flaky", "admin").await.unwrap();

        let mut values = HashMap::new();
        values.insert("mode".to_string(), "fancy".to_string());
        let err = f
            .lifecycle
            .update_settings("flaky", &values, "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::InitializationFailed { .. }));

        let record = f.lifecycle.stores().installs.get("flaky").await.unwrap().unwrap();
        assert_eq!(record.status, PluginStatus::Error);
        let events = f.lifecycle.events(Some("flaky"), 10).await.unwrap();
        assert_eq!(events[0].action, "error");
    }

    #[tokio::test]
    async fn catalog_reflects_install_state() {
        let banner = TestPlugin::named("banner");
        let f = fixture(&[(Arc::clone(&banner), manifest_toml("banner", &[], &[]))]);

        let before = f.lifecycle.catalog().await;
        assert_eq!(before.get("banner").unwrap().status, CatalogStatus::NotInstalled);

        f.lifecycle.install("banner", "admin").await.unwrap();
        let after = f.lifecycle.catalog().await;
        let entry = after.get("banner").unwrap();
        assert!(entry.installed);
        assert_eq!(entry.status, CatalogStatus::Enabled);
    }

    #[tokio::test]
    async fn update_settings_validates_persists_and_restarts() {
        let banner = TestPlugin::named("banner");
        let toml = format!(
            "{}\n[[settings]]\nkey = \"max_banners\"\ntype = \"number\"\ndefault = 5\nmin = 1\nmax = 20\n",
            manifest_toml("banner", &[], &[])
        );
        let f = fixture(&[(Arc::clone(&banner), toml)]);

        f.lifecycle.install("banner", "admin").await.unwrap();

        let mut values = HashMap::new();
        values.insert("max_banners".to_string(), "50".to_string());
        let err = f
            .lifecycle
            .update_settings("banner", &values, "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::SettingValidationFailed { .. }));

        values.insert("max_banners".to_string(), "10".to_string());
        f.lifecycle
            .update_settings("banner", &values, "admin")
            .await
            .unwrap();

        use std::sync::atomic::Ordering;
        // Restarted once to pick up the new value.
        assert_eq!(banner.init_calls.load(Ordering::SeqCst), 2);
        assert!(f.lifecycle.runtime().is_enabled("banner"));

        let current = f.lifecycle.current_settings("banner").await.unwrap();
        assert_eq!(current.get("max_banners").unwrap(), "10");

        let events = f.lifecycle.events(Some("banner"), 10).await.unwrap();
        assert!(events.iter().any(|e| e.action == "config_changed"));
    }

    #[tokio::test]
    async fn overview_aggregates_component_views() {
        let banner = TestPlugin::named("banner");
        let f = fixture(&[(Arc::clone(&banner), manifest_toml("banner", &[], &[]))]);
        f.lifecycle.install("banner", "admin").await.unwrap();

        let overview = f.lifecycle.overview().await;
        assert_eq!(overview.plugins.len(), 1);
        assert_eq!(overview.routes.len(), 1);
        assert!(!overview.recent_events.is_empty());
    }
}
