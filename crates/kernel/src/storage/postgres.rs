//! Store trait implementations over the plugin tables.
//!
//! Schema lives in `migrations/0001_plugin_runtime.sql` and is applied by
//! the external migration tool before the kernel starts.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use agora_runtime::plugin::PluginStatus;
use agora_runtime::store::{
    AuditEvent, EventStore, InstallRecord, InstallationStore, PermissionRecord, PermissionStore,
    SettingStore,
};

fn status_str(status: PluginStatus) -> &'static str {
    status.as_str()
}

fn parse_status(s: &str) -> PluginStatus {
    match s {
        "enabled" => PluginStatus::Enabled,
        "error" => PluginStatus::Error,
        _ => PluginStatus::Disabled,
    }
}

#[derive(FromRow)]
struct InstallRow {
    name: String,
    version: String,
    status: String,
    installed_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl From<InstallRow> for InstallRecord {
    fn from(row: InstallRow) -> Self {
        Self {
            name: row.name,
            version: row.version,
            status: parse_status(&row.status),
            installed_at: row.installed_at,
            updated_at: row.updated_at,
            last_error: row.last_error,
        }
    }
}

pub struct PostgresInstallationStore {
    pool: PgPool,
}

impl PostgresInstallationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstallationStore for PostgresInstallationStore {
    async fn get(&self, name: &str) -> anyhow::Result<Option<InstallRecord>> {
        let row = sqlx::query_as::<_, InstallRow>(
            "SELECT name, version, status, installed_at, updated_at, last_error
             FROM plugin_installations WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load installation record")?;
        Ok(row.map(InstallRecord::from))
    }

    async fn list(&self) -> anyhow::Result<Vec<InstallRecord>> {
        let rows = sqlx::query_as::<_, InstallRow>(
            "SELECT name, version, status, installed_at, updated_at, last_error
             FROM plugin_installations ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list installation records")?;
        Ok(rows.into_iter().map(InstallRecord::from).collect())
    }

    async fn upsert(&self, record: &InstallRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO plugin_installations
                 (name, version, status, installed_at, updated_at, last_error)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (name) DO UPDATE SET
                 version = EXCLUDED.version,
                 status = EXCLUDED.status,
                 updated_at = EXCLUDED.updated_at,
                 last_error = EXCLUDED.last_error",
        )
        .bind(&record.name)
        .bind(&record.version)
        .bind(status_str(record.status))
        .bind(record.installed_at)
        .bind(record.updated_at)
        .bind(&record.last_error)
        .execute(&self.pool)
        .await
        .context("failed to upsert installation record")?;
        Ok(())
    }

    async fn set_status(
        &self,
        name: &str,
        status: PluginStatus,
        last_error: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE plugin_installations
             SET status = $2, last_error = $3, updated_at = $4
             WHERE name = $1",
        )
        .bind(name)
        .bind(status_str(status))
        .bind(last_error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to update installation status")?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM plugin_installations WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .context("failed to delete installation record")?;
        Ok(())
    }
}

pub struct PostgresSettingStore {
    pool: PgPool,
}

impl PostgresSettingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingStore for PostgresSettingStore {
    async fn get_all(&self, plugin: &str) -> anyhow::Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM plugin_settings WHERE plugin = $1")
                .bind(plugin)
                .fetch_all(&self.pool)
                .await
                .context("failed to load plugin settings")?;
        Ok(rows.into_iter().collect())
    }

    async fn set(&self, plugin: &str, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO plugin_settings (plugin, key, value, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (plugin, key) DO UPDATE SET
                 value = EXCLUDED.value,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(plugin)
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to store plugin setting")?;
        Ok(())
    }

    async fn delete_all(&self, plugin: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM plugin_settings WHERE plugin = $1")
            .bind(plugin)
            .execute(&self.pool)
            .await
            .context("failed to delete plugin settings")?;
        Ok(())
    }
}

#[derive(FromRow)]
struct EventRow {
    plugin: String,
    action: String,
    details: Option<String>,
    actor: String,
    created_at: DateTime<Utc>,
}

pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, event: &AuditEvent) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO plugin_events (plugin, action, details, actor, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&event.plugin)
        .bind(&event.action)
        .bind(&event.details)
        .bind(&event.actor)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .context("failed to append audit event")?;
        Ok(())
    }

    async fn recent(&self, plugin: Option<&str>, limit: usize) -> anyhow::Result<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT plugin, action, details, actor, created_at
             FROM plugin_events
             WHERE $1::TEXT IS NULL OR plugin = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
        )
        .bind(plugin)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("failed to load audit events")?;

        Ok(rows
            .into_iter()
            .map(|row| AuditEvent {
                plugin: row.plugin,
                action: row.action,
                details: row.details,
                actor: row.actor,
                created_at: row.created_at,
            })
            .collect())
    }
}

#[derive(FromRow)]
struct PermissionRow {
    plugin: String,
    permission: String,
    label: String,
    min_level: i32,
}

pub struct PostgresPermissionStore {
    pool: PgPool,
}

impl PostgresPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionStore for PostgresPermissionStore {
    async fn sync(&self, plugin: &str, declared: &[PermissionRecord]) -> anyhow::Result<()> {
        let ids: Vec<String> = declared.iter().map(|p| p.id.clone()).collect();
        sqlx::query("DELETE FROM plugin_permissions WHERE plugin = $1 AND permission != ALL($2)")
            .bind(plugin)
            .bind(&ids)
            .execute(&self.pool)
            .await
            .context("failed to prune undeclared permissions")?;

        for permission in declared {
            // Existing rows keep their admin-tuned level.
            sqlx::query(
                "INSERT INTO plugin_permissions (plugin, permission, label, min_level)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (plugin, permission) DO UPDATE SET
                     label = EXCLUDED.label",
            )
            .bind(plugin)
            .bind(&permission.id)
            .bind(&permission.label)
            .bind(permission.min_level)
            .execute(&self.pool)
            .await
            .context("failed to sync permission")?;
        }
        Ok(())
    }

    async fn list(&self, plugin: &str) -> anyhow::Result<Vec<PermissionRecord>> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            "SELECT plugin, permission, label, min_level
             FROM plugin_permissions WHERE plugin = $1 ORDER BY permission",
        )
        .bind(plugin)
        .fetch_all(&self.pool)
        .await
        .context("failed to list permissions")?;

        Ok(rows
            .into_iter()
            .map(|row| PermissionRecord {
                plugin: row.plugin,
                id: row.permission,
                label: row.label,
                min_level: row.min_level,
            })
            .collect())
    }

    async fn set_level(&self, plugin: &str, id: &str, min_level: i32) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE plugin_permissions SET min_level = $3
             WHERE plugin = $1 AND permission = $2",
        )
        .bind(plugin)
        .bind(id)
        .bind(min_level)
        .execute(&self.pool)
        .await
        .context("failed to update permission level")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, plugin: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM plugin_permissions WHERE plugin = $1")
            .bind(plugin)
            .execute(&self.pool)
            .await
            .context("failed to delete permissions")?;
        Ok(())
    }
}
