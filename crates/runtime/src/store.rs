//! Persistence seams for plugin state.
//!
//! The runtime only ever talks to these traits. The host wires Postgres
//! implementations in production; the in-memory ones back tests and
//! storage-less operation, where installs simply do not survive restarts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::plugin::PluginStatus;

/// Durable installation record for one plugin.
#[derive(Debug, Clone, Serialize)]
pub struct InstallRecord {
    pub name: String,
    /// Version at install/last update time.
    pub version: String,
    pub status: PluginStatus,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl InstallRecord {
    pub fn new(name: &str, version: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            version: version.to_string(),
            status: PluginStatus::Disabled,
            installed_at: now,
            updated_at: now,
            last_error: None,
        }
    }
}

/// One audit-trail entry for a lifecycle action.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub plugin: String,
    /// One of: installed, enabled, disabled, uninstalled, config_changed,
    /// error.
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Admin account that drove the action, or "system" at boot.
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn now(plugin: &str, action: &str, actor: &str, details: Option<String>) -> Self {
        Self {
            plugin: plugin.to_string(),
            action: action.to_string(),
            details,
            actor: actor.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// A permission a plugin declares, synced on enable.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionRecord {
    pub plugin: String,
    pub id: String,
    pub label: String,
    /// Minimum member level required; admin-adjustable after sync.
    pub min_level: i32,
}

/// Installation records.
#[async_trait]
pub trait InstallationStore: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<Option<InstallRecord>>;
    async fn list(&self) -> anyhow::Result<Vec<InstallRecord>>;
    async fn upsert(&self, record: &InstallRecord) -> anyhow::Result<()>;
    async fn set_status(
        &self,
        name: &str,
        status: PluginStatus,
        last_error: Option<&str>,
    ) -> anyhow::Result<()>;
    async fn delete(&self, name: &str) -> anyhow::Result<()>;
}

/// Raw per-plugin setting strings.
#[async_trait]
pub trait SettingStore: Send + Sync {
    async fn get_all(&self, plugin: &str) -> anyhow::Result<HashMap<String, String>>;
    async fn set(&self, plugin: &str, key: &str, value: &str) -> anyhow::Result<()>;
    async fn delete_all(&self, plugin: &str) -> anyhow::Result<()>;
}

/// Append-only lifecycle audit trail.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> anyhow::Result<()>;
    /// Most recent entries, newest first, optionally for one plugin.
    async fn recent(&self, plugin: Option<&str>, limit: usize) -> anyhow::Result<Vec<AuditEvent>>;
}

/// Declared plugin permissions and their level thresholds.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Insert missing permissions, keep existing levels, drop undeclared ones.
    async fn sync(&self, plugin: &str, declared: &[PermissionRecord]) -> anyhow::Result<()>;
    async fn list(&self, plugin: &str) -> anyhow::Result<Vec<PermissionRecord>>;
    /// Adjust one permission's minimum level. Returns false when unknown.
    async fn set_level(&self, plugin: &str, id: &str, min_level: i32) -> anyhow::Result<bool>;
    async fn delete_all(&self, plugin: &str) -> anyhow::Result<()>;
}

/// The store handles the lifecycle orchestrator needs.
#[derive(Clone)]
pub struct Stores {
    pub installs: Arc<dyn InstallationStore>,
    pub settings: Arc<dyn SettingStore>,
    pub events: Arc<dyn EventStore>,
    pub permissions: Arc<dyn PermissionStore>,
}

impl Stores {
    /// All-in-memory stores for tests and storage-less hosts.
    pub fn in_memory() -> Self {
        Self {
            installs: Arc::new(MemoryInstallationStore::default()),
            settings: Arc::new(MemorySettingStore::default()),
            events: Arc::new(MemoryEventStore::default()),
            permissions: Arc::new(MemoryPermissionStore::default()),
        }
    }
}

#[derive(Default)]
pub struct MemoryInstallationStore {
    records: RwLock<HashMap<String, InstallRecord>>,
}

#[async_trait]
impl InstallationStore for MemoryInstallationStore {
    async fn get(&self, name: &str) -> anyhow::Result<Option<InstallRecord>> {
        Ok(self.records.read().get(name).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<InstallRecord>> {
        let mut all: Vec<InstallRecord> = self.records.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn upsert(&self, record: &InstallRecord) -> anyhow::Result<()> {
        self.records
            .write()
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn set_status(
        &self,
        name: &str,
        status: PluginStatus,
        last_error: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(name) {
            record.status = status;
            record.last_error = last_error.map(str::to_string);
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> anyhow::Result<()> {
        self.records.write().remove(name);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettingStore {
    values: RwLock<HashMap<String, HashMap<String, String>>>,
}

#[async_trait]
impl SettingStore for MemorySettingStore {
    async fn get_all(&self, plugin: &str) -> anyhow::Result<HashMap<String, String>> {
        Ok(self.values.read().get(plugin).cloned().unwrap_or_default())
    }

    async fn set(&self, plugin: &str, key: &str, value: &str) -> anyhow::Result<()> {
        self.values
            .write()
            .entry(plugin.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_all(&self, plugin: &str) -> anyhow::Result<()> {
        self.values.write().remove(plugin);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<AuditEvent>>,
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn recent(&self, plugin: Option<&str>, limit: usize) -> anyhow::Result<Vec<AuditEvent>> {
        let events = self.events.read();
        Ok(events
            .iter()
            .rev()
            .filter(|e| plugin.is_none_or(|p| e.plugin == p))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryPermissionStore {
    permissions: RwLock<HashMap<String, Vec<PermissionRecord>>>,
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn sync(&self, plugin: &str, declared: &[PermissionRecord]) -> anyhow::Result<()> {
        let mut permissions = self.permissions.write();
        let existing = permissions.entry(plugin.to_string()).or_default();

        let mut synced = Vec::with_capacity(declared.len());
        for decl in declared {
            // Admin-tuned levels survive a re-sync.
            let min_level = existing
                .iter()
                .find(|p| p.id == decl.id)
                .map_or(decl.min_level, |p| p.min_level);
            synced.push(PermissionRecord {
                min_level,
                ..decl.clone()
            });
        }
        *existing = synced;
        Ok(())
    }

    async fn list(&self, plugin: &str) -> anyhow::Result<Vec<PermissionRecord>> {
        Ok(self
            .permissions
            .read()
            .get(plugin)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_level(&self, plugin: &str, id: &str, min_level: i32) -> anyhow::Result<bool> {
        let mut permissions = self.permissions.write();
        let Some(list) = permissions.get_mut(plugin) else {
            return Ok(false);
        };
        match list.iter_mut().find(|p| p.id == id) {
            Some(permission) => {
                permission.min_level = min_level;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_all(&self, plugin: &str) -> anyhow::Result<()> {
        self.permissions.write().remove(plugin);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_records_round_trip() {
        let store = MemoryInstallationStore::default();
        store.upsert(&InstallRecord::new("banner", "1.0.0")).await.unwrap();

        let record = store.get("banner").await.unwrap().unwrap();
        assert_eq!(record.status, PluginStatus::Disabled);

        store
            .set_status("banner", PluginStatus::Error, Some("init failed"))
            .await
            .unwrap();
        let record = store.get("banner").await.unwrap().unwrap();
        assert_eq!(record.status, PluginStatus::Error);
        assert_eq!(record.last_error.as_deref(), Some("init failed"));

        store.delete("banner").await.unwrap();
        assert!(store.get("banner").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn audit_trail_is_newest_first_and_filterable() {
        let store = MemoryEventStore::default();
        store.append(&AuditEvent::now("a", "installed", "admin", None)).await.unwrap();
        store.append(&AuditEvent::now("b", "installed", "admin", None)).await.unwrap();
        store.append(&AuditEvent::now("a", "enabled", "admin", None)).await.unwrap();

        let all = store.recent(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].action, "enabled");

        let only_a = store.recent(Some("a"), 10).await.unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|e| e.plugin == "a"));

        assert_eq!(store.recent(None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn permission_sync_preserves_tuned_levels() {
        let store = MemoryPermissionStore::default();
        let declared = vec![PermissionRecord {
            plugin: "banner".into(),
            id: "banner.manage".into(),
            label: "Manage banners".into(),
            min_level: 1,
        }];
        store.sync("banner", &declared).await.unwrap();

        // An admin raises the level, then a re-enable re-syncs.
        assert!(store.set_level("banner", "banner.manage", 8).await.unwrap());
        assert!(!store.set_level("banner", "missing", 2).await.unwrap());
        store.sync("banner", &declared).await.unwrap();

        let listed = store.list("banner").await.unwrap();
        assert_eq!(listed[0].min_level, 8);
    }

    #[tokio::test]
    async fn permission_sync_drops_undeclared() {
        let store = MemoryPermissionStore::default();
        let two = vec![
            PermissionRecord {
                plugin: "p".into(),
                id: "p.read".into(),
                label: String::new(),
                min_level: 0,
            },
            PermissionRecord {
                plugin: "p".into(),
                id: "p.write".into(),
                label: String::new(),
                min_level: 4,
            },
        ];
        store.sync("p", &two).await.unwrap();
        store.sync("p", &two[..1].to_vec()).await.unwrap();

        let listed = store.list("p").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "p.read");
    }
}
