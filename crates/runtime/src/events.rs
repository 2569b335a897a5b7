//! In-process event bus for decoupled cross-plugin notification.
//!
//! Delivery is best-effort, at-most-once, and non-persistent. Subscribers
//! run in registration order inside a per-handler panic boundary: one
//! subscriber failing never blocks delivery to the others or crashes the
//! publisher.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error};

use crate::hooks::panic_message;
use crate::metrics::MetricsCollector;

/// An event delivered to topic subscribers.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    /// Publishing plugin (or host component).
    pub source: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Event handler callback.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    plugin: String,
    handler: EventHandler,
}

/// Named-topic publish/subscribe between plugins.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Subscription>>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            metrics: None,
        }
    }

    /// A bus that counts published events per source.
    pub fn with_metrics(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            metrics: Some(metrics),
        }
    }

    /// Subscribe a plugin's handler to a topic.
    pub fn subscribe<F>(&self, plugin: &str, topic: &str, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut subs = self.subscribers.write();
        subs.entry(topic.to_string()).or_default().push(Subscription {
            plugin: plugin.to_string(),
            handler: Arc::new(handler),
        });
        debug!(plugin, topic, "subscribed to topic");
    }

    /// Remove all of a plugin's subscriptions, pruning empty topics.
    pub fn unsubscribe(&self, plugin: &str) {
        let mut subs = self.subscribers.write();
        for list in subs.values_mut() {
            list.retain(|s| s.plugin != plugin);
        }
        subs.retain(|_, list| !list.is_empty());
    }

    /// Deliver an event to every subscriber of a topic, synchronously and in
    /// registration order. Subscriber panics are logged and contained.
    pub fn publish(&self, source: &str, topic: &str, payload: Value) {
        if let Some(metrics) = &self.metrics {
            metrics.record_event(source);
        }

        let snapshot: Vec<Subscription> = {
            let subs = self.subscribers.read();
            subs.get(topic).cloned().unwrap_or_default()
        };

        if snapshot.is_empty() {
            return;
        }

        let event = Event {
            topic: topic.to_string(),
            source: source.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        for sub in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (sub.handler)(&event))) {
                error!(
                    source,
                    topic,
                    subscriber = %sub.plugin,
                    panic = %panic_message(&panic),
                    "event subscriber panicked"
                );
            }
        }
    }

    /// Deliver an event on a detached task; the publisher never waits and
    /// cannot observe subscriber failure except via logs.
    pub fn publish_async(self: &Arc<Self>, source: &str, topic: &str, payload: Value) {
        let bus = Arc::clone(self);
        let source = source.to_string();
        let topic = topic.to_string();
        tokio::spawn(async move {
            bus.publish(&source, &topic, payload);
        });
    }

    /// Topic → subscriber-plugin map for the admin surface.
    pub fn subscriptions(&self) -> HashMap<String, Vec<String>> {
        let subs = self.subscribers.read();
        subs.iter()
            .map(|(topic, list)| {
                (
                    topic.clone(),
                    list.iter().map(|s| s.plugin.clone()).collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(name, "post.created", move |event| {
                seen.lock().unwrap().push((name, event.payload.clone()));
            });
        }

        bus.publish("forum", "post.created", json!({"id": 7}));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "first");
        assert_eq!(seen[1].1, json!({"id": 7}));
    }

    #[test]
    fn panicking_subscriber_does_not_block_siblings() {
        let bus = EventBus::new();
        let delivered = Arc::new(Mutex::new(false));

        bus.subscribe("chaos", "user.banned", |_event| {
            panic!("subscriber exploded");
        });
        let delivered2 = delivered.clone();
        bus.subscribe("steady", "user.banned", move |_event| {
            *delivered2.lock().unwrap() = true;
        });

        // The publisher must survive the panic and still reach "steady".
        bus.publish("forum", "user.banned", json!({}));
        assert!(*delivered.lock().unwrap());
    }

    #[test]
    fn unsubscribe_prunes_empty_topics() {
        let bus = EventBus::new();
        bus.subscribe("p1", "a", |_| {});
        bus.subscribe("p1", "b", |_| {});
        bus.subscribe("p2", "b", |_| {});

        bus.unsubscribe("p1");

        let map = bus.subscriptions();
        assert!(!map.contains_key("a"));
        assert_eq!(map.get("b").unwrap(), &vec!["p2".to_string()]);
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish("forum", "ghost.topic", json!({}));
    }

    #[tokio::test]
    async fn publish_async_is_detached() {
        let bus = Arc::new(EventBus::new());
        let (tx, rx) = std::sync::mpsc::channel();

        bus.subscribe("listener", "detached", move |event| {
            tx.send(event.topic.clone()).unwrap();
        });

        bus.publish_async("forum", "detached", json!({}));

        let topic = tokio::task::spawn_blocking(move || {
            rx.recv_timeout(Duration::from_secs(2)).unwrap()
        })
        .await
        .unwrap();
        assert_eq!(topic, "detached");
    }
}
