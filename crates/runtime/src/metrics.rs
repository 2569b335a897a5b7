//! Per-plugin, per-endpoint usage counters for the admin surface.
//!
//! Counters live in memory only and reset with the process. Averages and
//! error rates are computed on read, never stored.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Default, Clone)]
struct EndpointCounters {
    requests: u64,
    errors: u64,
    total_duration: Duration,
    min_duration: Option<Duration>,
    max_duration: Duration,
}

#[derive(Default)]
struct PluginCounters {
    endpoints: HashMap<String, EndpointCounters>,
    hook_invocations: u64,
    events_published: u64,
    last_request: Option<DateTime<Utc>>,
}

/// Read-side view of one endpoint's counters.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointMetrics {
    pub endpoint: String,
    pub requests: u64,
    pub errors: u64,
    /// Errors per request; zero when no requests yet.
    pub error_rate: f64,
    /// Mean handler latency in milliseconds; zero when no requests yet.
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
}

/// Read-side view of one plugin's counters.
#[derive(Debug, Clone, Serialize)]
pub struct PluginMetrics {
    pub plugin: String,
    pub requests: u64,
    pub errors: u64,
    pub endpoints: Vec<EndpointMetrics>,
    pub hook_invocations: u64,
    pub events_published: u64,
    pub last_request: Option<DateTime<Utc>>,
}

/// Aggregates request, hook, and event counters per plugin.
pub struct MetricsCollector {
    counters: RwLock<HashMap<String, PluginCounters>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Record one handled request and its outcome.
    pub fn record_request(&self, plugin: &str, endpoint: &str, duration: Duration, is_error: bool) {
        let mut counters = self.counters.write();
        let plugin_counters = counters.entry(plugin.to_string()).or_default();
        let endpoint_counters = plugin_counters
            .endpoints
            .entry(endpoint.to_string())
            .or_default();

        endpoint_counters.requests += 1;
        if is_error {
            endpoint_counters.errors += 1;
        }
        endpoint_counters.total_duration += duration;
        endpoint_counters.min_duration = Some(
            endpoint_counters
                .min_duration
                .map_or(duration, |min| min.min(duration)),
        );
        endpoint_counters.max_duration = endpoint_counters.max_duration.max(duration);
        plugin_counters.last_request = Some(Utc::now());
    }

    /// Record one hook handler invocation.
    pub fn record_hook(&self, plugin: &str) {
        let mut counters = self.counters.write();
        counters.entry(plugin.to_string()).or_default().hook_invocations += 1;
    }

    /// Record one published event.
    pub fn record_event(&self, plugin: &str) {
        let mut counters = self.counters.write();
        counters.entry(plugin.to_string()).or_default().events_published += 1;
    }

    /// Clear one plugin's counters.
    pub fn reset(&self, plugin: &str) {
        self.counters.write().remove(plugin);
    }

    /// Clear everything.
    pub fn reset_all(&self) {
        self.counters.write().clear();
    }

    /// Counters for one plugin, if any activity was recorded.
    pub fn plugin(&self, plugin: &str) -> Option<PluginMetrics> {
        let counters = self.counters.read();
        counters.get(plugin).map(|c| Self::view(plugin, c))
    }

    /// All counters, sorted by plugin name.
    pub fn snapshot(&self) -> Vec<PluginMetrics> {
        let counters = self.counters.read();
        let mut all: Vec<PluginMetrics> = counters
            .iter()
            .map(|(plugin, c)| Self::view(plugin, c))
            .collect();
        all.sort_by(|a, b| a.plugin.cmp(&b.plugin));
        all
    }

    fn view(plugin: &str, counters: &PluginCounters) -> PluginMetrics {
        let mut endpoints: Vec<EndpointMetrics> = counters
            .endpoints
            .iter()
            .map(|(endpoint, c)| {
                let requests = c.requests;
                let (error_rate, avg_latency_ms) = if requests == 0 {
                    (0.0, 0.0)
                } else {
                    (
                        c.errors as f64 / requests as f64,
                        c.total_duration.as_secs_f64() * 1000.0 / requests as f64,
                    )
                };
                EndpointMetrics {
                    endpoint: endpoint.clone(),
                    requests,
                    errors: c.errors,
                    error_rate,
                    avg_latency_ms,
                    min_latency_ms: c.min_duration.unwrap_or_default().as_secs_f64() * 1000.0,
                    max_latency_ms: c.max_duration.as_secs_f64() * 1000.0,
                }
            })
            .collect();
        endpoints.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));

        PluginMetrics {
            plugin: plugin.to_string(),
            requests: endpoints.iter().map(|e| e.requests).sum(),
            errors: endpoints.iter().map(|e| e.errors).sum(),
            endpoints,
            hook_invocations: counters.hook_invocations,
            events_published: counters.events_published,
            last_request: counters.last_request,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn request_counters_accumulate_per_endpoint() {
        let metrics = MetricsCollector::new();
        metrics.record_request("banner", "GET /active", Duration::from_millis(10), false);
        metrics.record_request("banner", "GET /active", Duration::from_millis(30), true);
        metrics.record_request("banner", "POST /banners", Duration::from_millis(5), false);

        let m = metrics.plugin("banner").unwrap();
        assert_eq!(m.requests, 3);
        assert_eq!(m.errors, 1);
        assert_eq!(m.endpoints.len(), 2);

        let active = m.endpoints.iter().find(|e| e.endpoint == "GET /active").unwrap();
        assert_eq!(active.requests, 2);
        assert!((active.avg_latency_ms - 20.0).abs() < 0.01);
        assert!((active.min_latency_ms - 10.0).abs() < 0.01);
        assert!((active.max_latency_ms - 30.0).abs() < 0.01);
        assert!((active.error_rate - 0.5).abs() < 0.01);
    }

    #[test]
    fn hook_and_event_counters_are_independent() {
        let metrics = MetricsCollector::new();
        metrics.record_hook("banner");
        metrics.record_hook("banner");
        metrics.record_event("banner");

        let m = metrics.plugin("banner").unwrap();
        assert_eq!(m.hook_invocations, 2);
        assert_eq!(m.events_published, 1);
        assert_eq!(m.requests, 0);
    }

    #[test]
    fn reset_clears_one_plugin_and_reset_all_clears_everything() {
        let metrics = MetricsCollector::new();
        metrics.record_hook("zeta");
        metrics.record_hook("alpha");

        let all = metrics.snapshot();
        assert_eq!(all[0].plugin, "alpha");
        assert_eq!(all[1].plugin, "zeta");

        metrics.reset("alpha");
        assert!(metrics.plugin("alpha").is_none());
        assert_eq!(metrics.snapshot().len(), 1);

        metrics.reset_all();
        assert!(metrics.snapshot().is_empty());
    }
}
