//! Agora plugin runtime.
//!
//! This crate is the extensibility layer of the Agora forum host:
//! - Parsing plugin metadata from `plugin.toml` manifests
//! - Merging discovered and built-in plugins into a catalog
//! - Driving the install/enable/disable/uninstall lifecycle
//! - Priority-ordered hooks, topic pub/sub, and recurring schedules
//! - Fault isolation (panic recovery, timeouts, rate limits) around
//!   plugin-owned code

pub mod catalog;
pub mod error;
pub mod events;
pub mod hooks;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod metrics;
pub mod plugin;
pub mod ratelimit;
pub mod registry;
pub mod runtime;
pub mod sandbox;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod version;

pub use catalog::{Catalog, CatalogEntry, CatalogStatus};
pub use error::PluginError;
pub use events::{Event, EventBus};
pub use hooks::{HookContext, HookManager};
pub use lifecycle::{Overview, PluginLifecycle};
pub use loader::{BuiltinRegistry, DiscoveredPlugin, Loader};
pub use manifest::Manifest;
pub use metrics::MetricsCollector;
pub use plugin::{Plugin, PluginContext, PluginHealth, PluginStatus, SettingValue};
pub use ratelimit::{RateLimitStatus, RateLimiter};
pub use registry::{AuthMode, RouteParams, RouteRegistry, RouteTable};
pub use runtime::{RuntimeConfig, RuntimeManager};
pub use sandbox::SandboxConfig;
pub use scheduler::Scheduler;
pub use store::{AuditEvent, InstallRecord, PermissionRecord, Stores};
pub use version::{SemVer, VersionConstraint};

/// Version of the host exposed to manifest `requires.host` ranges.
pub const HOST_VERSION: &str = "1.0.0";
