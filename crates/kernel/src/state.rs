//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use redis::Client as RedisClient;
use sqlx::PgPool;
use tracing::{info, warn};

use agora_runtime::sandbox::SandboxConfig;
use agora_runtime::{
    BuiltinRegistry, Loader, PluginLifecycle, RuntimeConfig, RuntimeManager, Stores,
};

use crate::config::Config;
use crate::storage;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,

    /// PostgreSQL connection pool; absent when running storage-less.
    db: Option<PgPool>,

    /// Plugin lifecycle orchestrator; also owns the runtime manager.
    lifecycle: Arc<PluginLifecycle>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let db = match &config.database_url {
            Some(url) => Some(
                sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.database_max_connections)
                    .connect_lazy(url)
                    .context("invalid DATABASE_URL")?,
            ),
            None => {
                warn!("DATABASE_URL not set, plugin state will not survive restarts");
                None
            }
        };

        let redis: Option<RedisClient> = match &config.redis_url {
            Some(url) => Some(redis::Client::open(url.as_str()).context("invalid REDIS_URL")?),
            None => {
                warn!("REDIS_URL not set, rate limiting is process-local");
                None
            }
        };

        let stores = match &db {
            Some(pool) => storage::postgres_stores(pool.clone()),
            None => Stores::in_memory(),
        };

        let builtins = Arc::new(BuiltinRegistry::new());
        builtins.register(agora_banner::manifest()?, agora_banner::BannerPlugin::shared())?;
        info!(builtins = builtins.names().len(), "built-in plugins registered");

        let loader = Arc::new(Loader::new(builtins, Some(config.plugins_dir.clone())));
        let runtime = Arc::new(RuntimeManager::new(
            db.clone(),
            redis,
            RuntimeConfig {
                sandbox: SandboxConfig {
                    request_timeout: config.plugin_timeout,
                    recover_panics: true,
                },
                scheduler_cadence: config.scheduler_cadence,
            },
        ));
        let lifecycle = Arc::new(PluginLifecycle::new(
            loader,
            runtime,
            stores,
            &config.host_version,
        ));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                lifecycle,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn db(&self) -> Option<&PgPool> {
        self.inner.db.as_ref()
    }

    pub fn lifecycle(&self) -> &Arc<PluginLifecycle> {
        &self.inner.lifecycle
    }

    pub fn runtime(&self) -> &Arc<RuntimeManager> {
        self.inner.lifecycle.runtime()
    }
}
