//! Plugin discovery.
//!
//! Two sources feed the catalog: built-ins compiled into the host and
//! registered explicitly at assembly time, and filesystem plugins declared
//! by a `plugin.toml` in a subdirectory of the plugins directory. A broken
//! manifest is reported per plugin and never aborts sibling discovery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::PluginError;
use crate::manifest::Manifest;
use crate::plugin::Plugin;

/// A plugin known to the host, with its live instance when one exists.
///
/// Filesystem discoveries without a matching built-in carry manifest and
/// path only; they appear in the catalog but cannot be enabled.
#[derive(Clone)]
pub struct DiscoveredPlugin {
    pub manifest: Manifest,
    /// Plugin directory; empty for built-ins.
    pub base_path: PathBuf,
    pub instance: Option<Arc<dyn Plugin>>,
    pub builtin: bool,
}

/// A manifest that failed to load, kept for the catalog's error view.
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub path: PathBuf,
    pub error: PluginError,
}

/// Explicitly assembled registry of built-in plugins.
///
/// Populated once at process start by the host binary; registration order
/// is the host's assembly order, not link order.
pub struct BuiltinRegistry {
    entries: RwLock<Vec<(Manifest, Arc<dyn Plugin>)>>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a built-in. Idempotent by name; a second registration under
    /// the same name is ignored.
    pub fn register(&self, manifest: Manifest, instance: Arc<dyn Plugin>) -> Result<(), PluginError> {
        if manifest.name != instance.name() {
            return Err(PluginError::ManifestInvalid {
                path: format!("builtin:{}", instance.name()),
                details: format!(
                    "manifest name '{}' does not match instance name '{}'",
                    manifest.name,
                    instance.name()
                ),
            });
        }

        let mut entries = self.entries.write();
        if entries.iter().any(|(m, _)| m.name == manifest.name) {
            debug!(plugin = %manifest.name, "builtin already registered");
            return Ok(());
        }
        debug!(plugin = %manifest.name, version = %manifest.version, "builtin registered");
        entries.push((manifest, instance));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<(Manifest, Arc<dyn Plugin>)> {
        let entries = self.entries.read();
        entries
            .iter()
            .find(|(m, _)| m.name == name)
            .map(|(m, i)| (m.clone(), Arc::clone(i)))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|(m, _)| m.name.clone()).collect()
    }

    fn all(&self) -> Vec<(Manifest, Arc<dyn Plugin>)> {
        self.entries
            .read()
            .iter()
            .map(|(m, i)| (m.clone(), Arc::clone(i)))
            .collect()
    }
}

/// Merges built-ins and filesystem manifests into the discovery set.
pub struct Loader {
    builtins: Arc<BuiltinRegistry>,
    /// Directory scanned for `<plugin>/plugin.toml`; absent for hosts that
    /// ship built-ins only.
    plugins_dir: Option<PathBuf>,
}

impl Loader {
    pub fn new(builtins: Arc<BuiltinRegistry>, plugins_dir: Option<PathBuf>) -> Self {
        Self {
            builtins,
            plugins_dir,
        }
    }

    /// Discover every known plugin. Built-ins win name collisions with
    /// filesystem manifests; broken manifests land in the failure list.
    pub fn discover(&self) -> (Vec<DiscoveredPlugin>, Vec<DiscoveryFailure>) {
        let mut discovered: Vec<DiscoveredPlugin> = self
            .builtins
            .all()
            .into_iter()
            .map(|(manifest, instance)| DiscoveredPlugin {
                manifest,
                base_path: PathBuf::new(),
                instance: Some(instance),
                builtin: true,
            })
            .collect();
        let mut failures = Vec::new();

        if let Some(dir) = &self.plugins_dir {
            self.scan_dir(dir, &mut discovered, &mut failures);
        }

        discovered.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
        (discovered, failures)
    }

    /// Find one plugin by name.
    pub fn find(&self, name: &str) -> Option<DiscoveredPlugin> {
        let (discovered, _) = self.discover();
        discovered.into_iter().find(|p| p.manifest.name == name)
    }

    fn scan_dir(
        &self,
        dir: &Path,
        discovered: &mut Vec<DiscoveredPlugin>,
        failures: &mut Vec<DiscoveryFailure>,
    ) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "plugins directory unreadable");
                return;
            }
        };

        let known: HashMap<String, ()> = discovered
            .iter()
            .map(|p| (p.manifest.name.clone(), ()))
            .collect();

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let manifest_path = path.join("plugin.toml");
            if !manifest_path.is_file() {
                continue;
            }

            match Manifest::parse_file(&manifest_path) {
                Ok(manifest) => {
                    if known.contains_key(&manifest.name) {
                        warn!(
                            plugin = %manifest.name,
                            path = %path.display(),
                            "filesystem manifest shadows a builtin, ignoring"
                        );
                        continue;
                    }
                    debug!(plugin = %manifest.name, path = %path.display(), "plugin discovered");
                    discovered.push(DiscoveredPlugin {
                        manifest,
                        base_path: path,
                        instance: None,
                        builtin: false,
                    });
                }
                Err(error) => {
                    warn!(path = %manifest_path.display(), error = %error, "invalid manifest skipped");
                    failures.push(DiscoveryFailure { path, error });
                }
            }
        }
    }
}
