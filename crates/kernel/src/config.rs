//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use agora_runtime::HOST_VERSION;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// Version advertised to plugin compatibility checks (default: the
    /// compiled host version).
    pub host_version: String,

    /// PostgreSQL connection URL. When None, plugin state is kept in memory
    /// and does not survive restarts.
    pub database_url: Option<String>,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Redis connection URL. When None, rate limiting is process-local.
    pub redis_url: Option<String>,

    /// Directory scanned for filesystem plugin manifests (default: ./plugins).
    pub plugins_dir: PathBuf,

    /// Bearer token guarding the plugin admin API. When None, the admin
    /// surface rejects every request.
    pub admin_token: Option<String>,

    /// Bearer token accepted on member-authenticated plugin routes.
    pub api_token: Option<String>,

    /// Deadline for plugin request handlers (default: 30s).
    pub plugin_timeout: Duration,

    /// Scheduler wakeup cadence (default: 30s, minimum 1s).
    pub scheduler_cadence: Duration,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let host_version = env::var("HOST_VERSION")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| HOST_VERSION.to_string());

        let database_url = env::var("DATABASE_URL").ok();

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let redis_url = env::var("REDIS_URL").ok();

        let plugins_dir = env::var("PLUGINS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./plugins"));

        let admin_token = env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
        let api_token = env::var("API_TOKEN").ok().filter(|t| !t.is_empty());

        let plugin_timeout = env::var("PLUGIN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map(Duration::from_secs)
            .context("PLUGIN_TIMEOUT_SECS must be a valid u64")?;

        let scheduler_cadence = env::var("SCHEDULER_CADENCE_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .map(|secs| Duration::from_secs(secs.max(1)))
            .context("SCHEDULER_CADENCE_SECS must be a valid u64")?;

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| vec!["*".to_string()]);

        Ok(Self {
            port,
            host_version,
            database_url,
            database_max_connections,
            redis_url,
            plugins_dir,
            admin_token,
            api_token,
            plugin_timeout,
            scheduler_cadence,
            cors_allowed_origins,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host_version: HOST_VERSION.to_string(),
            database_url: None,
            database_max_connections: 10,
            redis_url: None,
            plugins_dir: PathBuf::from("./plugins"),
            admin_token: None,
            api_token: None,
            plugin_timeout: Duration::from_secs(30),
            scheduler_cadence: Duration::from_secs(30),
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}
