//! Per-plugin request budgets.
//!
//! Budgets are enforced per plugin and client key. When a cache connection
//! is available the window slides (a Redis sorted set of request timestamps
//! shared across host processes); without one, enforcement degrades to an
//! in-process fixed window rather than failing open entirely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::PluginError;

/// Request budget for one plugin.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub limit: u32,
    pub window: Duration,
}

/// Budget view for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitInfo {
    pub plugin: String,
    pub limit: u32,
    pub window_secs: u64,
}

/// Outcome of an allowed request, for response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub window_secs: u64,
}

struct LocalWindow {
    started: Instant,
    count: u32,
}

/// Sliding-window rate limiter with an in-process fixed-window fallback.
pub struct RateLimiter {
    cache: Option<redis::Client>,
    configs: RwLock<HashMap<String, RateLimitConfig>>,
    local: Mutex<HashMap<String, LocalWindow>>,
    seq: AtomicU64,
}

impl RateLimiter {
    pub fn new(cache: Option<redis::Client>) -> Self {
        Self {
            cache,
            configs: RwLock::new(HashMap::new()),
            local: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Set (or replace) a plugin's budget.
    pub fn set_limit(&self, plugin: &str, limit: u32, window: Duration) {
        self.configs.write().insert(
            plugin.to_string(),
            RateLimitConfig { limit, window },
        );
        debug!(plugin, limit, window_secs = window.as_secs(), "rate limit configured");
    }

    /// Remove a plugin's budget and its local counters.
    pub fn remove(&self, plugin: &str) {
        self.configs.write().remove(plugin);
        let prefix = format!("{plugin}:");
        self.local.lock().retain(|key, _| !key.starts_with(&prefix));
    }

    /// Check one request against the plugin's budget.
    ///
    /// Returns `None` for plugins without a configured budget, otherwise the
    /// remaining budget for response headers. Cache errors fall back to the
    /// local window; they never fail the request on their own.
    pub async fn check(
        &self,
        plugin: &str,
        client: &str,
    ) -> Result<Option<RateLimitStatus>, PluginError> {
        let Some(config) = self.configs.read().get(plugin).copied() else {
            return Ok(None);
        };

        let key = format!("{plugin}:{client}");
        let count = match &self.cache {
            Some(cache) => match self.check_sliding(cache, &key, config).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(plugin, error = %e, "rate limit cache unavailable, using local window");
                    self.check_local(&key, config, Instant::now())
                }
            },
            None => self.check_local(&key, config, Instant::now()),
        };

        if count <= config.limit {
            Ok(Some(RateLimitStatus {
                limit: config.limit,
                remaining: config.limit - count,
                window_secs: config.window.as_secs(),
            }))
        } else {
            Err(PluginError::RateLimitExceeded {
                plugin: plugin.to_string(),
                limit: config.limit,
                window_secs: config.window.as_secs(),
            })
        }
    }

    /// All configured budgets, for the admin surface.
    pub fn limits(&self) -> Vec<RateLimitInfo> {
        let configs = self.configs.read();
        let mut infos: Vec<RateLimitInfo> = configs
            .iter()
            .map(|(plugin, c)| RateLimitInfo {
                plugin: plugin.clone(),
                limit: c.limit,
                window_secs: c.window.as_secs(),
            })
            .collect();
        infos.sort_by(|a, b| a.plugin.cmp(&b.plugin));
        infos
    }

    /// Count this request within the trailing window, shared across host
    /// processes.
    async fn check_sliding(
        &self,
        cache: &redis::Client,
        key: &str,
        config: RateLimitConfig,
    ) -> redis::RedisResult<u32> {
        let mut conn = cache.get_multiplexed_async_connection().await?;
        let redis_key = format!("ratelimit:{key}");
        let now_ms = chrono::Utc::now().timestamp_millis();
        let cutoff = now_ms - config.window.as_millis() as i64;
        let member = format!("{now_ms}-{}", self.seq.fetch_add(1, Ordering::Relaxed));

        let (count,): (u32,) = redis::pipe()
            .zrembyscore(&redis_key, 0, cutoff)
            .ignore()
            .zadd(&redis_key, member, now_ms)
            .ignore()
            .zcard(&redis_key)
            .query_async(&mut conn)
            .await?;

        let _: () = conn
            .expire(&redis_key, config.window.as_secs() as i64 + 1)
            .await?;

        Ok(count)
    }

    /// Fixed-window counter, process-local and less precise than the shared
    /// path.
    fn check_local(&self, key: &str, config: RateLimitConfig, now: Instant) -> u32 {
        let mut local = self.local.lock();
        let window = local.entry(key.to_string()).or_insert(LocalWindow {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= config.window {
            window.started = now;
            window.count = 0;
        }

        window.count += 1;
        window.count
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn limiter_without_cache() -> RateLimiter {
        RateLimiter::new(None)
    }

    #[tokio::test]
    async fn budget_allows_limit_then_rejects() {
        let limiter = limiter_without_cache();
        limiter.set_limit("banner", 3, Duration::from_secs(60));

        for expected_remaining in [2, 1, 0] {
            let status = limiter.check("banner", "10.0.0.1").await.unwrap().unwrap();
            assert_eq!(status.remaining, expected_remaining);
            assert_eq!(status.limit, 3);
        }
        let err = limiter.check("banner", "10.0.0.1").await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::RateLimitExceeded { limit: 3, window_secs: 60, .. }
        ));
    }

    #[tokio::test]
    async fn clients_have_independent_budgets() {
        let limiter = limiter_without_cache();
        limiter.set_limit("banner", 1, Duration::from_secs(60));

        limiter.check("banner", "10.0.0.1").await.unwrap();
        limiter.check("banner", "10.0.0.2").await.unwrap();
        assert!(limiter.check("banner", "10.0.0.1").await.is_err());
    }

    #[tokio::test]
    async fn unconfigured_plugin_is_unlimited() {
        let limiter = limiter_without_cache();
        for _ in 0..100 {
            assert!(limiter.check("no_budget", "10.0.0.1").await.unwrap().is_none());
        }
    }

    #[test]
    fn local_window_resets_after_expiry() {
        let limiter = limiter_without_cache();
        let config = RateLimitConfig {
            limit: 1,
            window: Duration::from_secs(60),
        };
        let start = Instant::now();

        assert_eq!(limiter.check_local("p:c", config, start), 1);
        assert_eq!(limiter.check_local("p:c", config, start + Duration::from_secs(30)), 2);
        // A fresh window starts once the old one has fully elapsed.
        assert_eq!(limiter.check_local("p:c", config, start + Duration::from_secs(61)), 1);
    }

    #[tokio::test]
    async fn remove_clears_budget_and_counters() {
        let limiter = limiter_without_cache();
        limiter.set_limit("banner", 1, Duration::from_secs(60));
        limiter.check("banner", "c").await.unwrap();
        assert!(limiter.check("banner", "c").await.is_err());

        limiter.remove("banner");
        limiter.check("banner", "c").await.unwrap();
        assert!(limiter.limits().is_empty());
    }

    #[test]
    fn limits_are_sorted_by_plugin() {
        let limiter = limiter_without_cache();
        limiter.set_limit("zeta", 1, Duration::from_secs(1));
        limiter.set_limit("alpha", 2, Duration::from_secs(2));

        let infos = limiter.limits();
        assert_eq!(infos[0].plugin, "alpha");
        assert_eq!(infos[1].plugin, "zeta");
    }
}
