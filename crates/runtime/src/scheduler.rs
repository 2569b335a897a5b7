//! Recurring background jobs for plugins.
//!
//! A single host-owned ticker wakes at a fixed cadence and runs every task
//! whose deadline has passed. Deadlines advance from the tick that ran the
//! task, not from the task's previous deadline, so a slow or missed cycle
//! never causes catch-up bursts.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::sandbox;

/// Boxed async job callback.
pub type TaskHandler =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

struct ScheduledTask {
    plugin: String,
    name: String,
    interval: Duration,
    handler: TaskHandler,
    next_run: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    run_count: u64,
    last_error: Option<String>,
}

/// Read-only task view for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub plugin: String,
    pub name: String,
    pub interval_secs: u64,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub last_error: Option<String>,
}

/// Interval-based task scheduler shared by all plugins.
pub struct Scheduler {
    tasks: Mutex<Vec<ScheduledTask>>,
    cadence: Duration,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.tasks.lock().len())
            .field("cadence", &self.cadence)
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Scheduler {
    pub fn new(cadence: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            tasks: Mutex::new(Vec::new()),
            cadence,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Register a recurring task. The first run happens on the first tick at
    /// or after `now + interval`.
    pub fn register<F, Fut>(&self, plugin: &str, name: &str, interval: Duration, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        tasks.push(ScheduledTask {
            plugin: plugin.to_string(),
            name: name.to_string(),
            interval,
            handler: Arc::new(move || Box::pin(handler())),
            next_run: Utc::now() + interval,
            last_run: None,
            run_count: 0,
            last_error: None,
        });
        debug!(plugin, task = name, interval_secs = interval.as_secs(), "task registered");
    }

    /// Drop every task a plugin registered.
    pub fn unregister(&self, plugin: &str) {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| t.plugin != plugin);
        let removed = before - tasks.len();
        if removed > 0 {
            debug!(plugin, removed, "tasks unregistered");
        }
    }

    /// Run every task due at `now`, sequentially.
    ///
    /// After a run the next deadline is `now + interval`, measured from this
    /// tick. Task errors and panics are recorded on the task and logged; a
    /// failing task keeps its schedule and never stops siblings.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let due: Vec<(String, String, TaskHandler)> = {
            let tasks = self.tasks.lock();
            tasks
                .iter()
                .filter(|t| t.next_run <= now)
                .map(|t| (t.plugin.clone(), t.name.clone(), Arc::clone(&t.handler)))
                .collect()
        };

        for (plugin, name, handler) in due {
            let result = sandbox::safe_call_future(&plugin, handler()).await;
            let error = match result {
                Ok(()) => None,
                Err(e) => {
                    error!(plugin, task = %name, error = %e, "scheduled task failed");
                    Some(e.to_string())
                }
            };

            let mut tasks = self.tasks.lock();
            // The task may have been unregistered while it ran.
            if let Some(task) = tasks
                .iter_mut()
                .find(|t| t.plugin == plugin && t.name == name)
            {
                task.last_run = Some(now);
                task.next_run = now + task.interval;
                task.run_count += 1;
                task.last_error = error;
            }
        }
    }

    /// Start the background ticker. Idempotent; a second call is ignored.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            warn!("scheduler already running");
            return;
        }

        let scheduler = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(async move {
            // tokio::time::interval panics on a zero period.
            let cadence = scheduler.cadence.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first interval tick fires immediately; consume it.
            ticker.tick().await;
            info!(cadence_secs = scheduler.cadence.as_secs(), "scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.tick(Utc::now()).await;
                    }
                    _ = shutdown.changed() => {
                        info!("scheduler stopping");
                        break;
                    }
                }
            }
        }));
    }

    /// Stop the ticker and wait for the in-flight cycle to finish.
    pub async fn stop(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = self.shutdown.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler task ended abnormally");
            }
        }
    }

    /// Snapshot of all registered tasks for the admin surface.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let tasks = self.tasks.lock();
        tasks
            .iter()
            .map(|t| TaskInfo {
                plugin: t.plugin.clone(),
                name: t.name.clone(),
                interval_secs: t.interval.as_secs(),
                next_run: t.next_run,
                last_run: t.last_run,
                run_count: t.run_count,
                last_error: t.last_error.clone(),
            })
            .collect()
    }
}
