//! Parser for plugin `plugin.toml` manifest files.
//!
//! Each plugin directory carries a `plugin.toml` declaring identity,
//! compatibility requirements, and every extension point the plugin uses:
//! dependencies, conflicts, settings, permissions, hooks, routes, and
//! migration references. A manifest is immutable once loaded.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;
use crate::version;

/// Plugin metadata parsed from `plugin.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Plugin machine name; the unique key across catalog, records, and
    /// runtime state.
    pub name: String,

    /// Semantic version (e.g. "1.0.0").
    pub version: String,

    /// Human-readable title shown in the admin catalog.
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub license: String,

    /// Compatibility requirements.
    pub requires: Requires,

    /// Names of plugins this one cannot coexist with while enabled.
    #[serde(default)]
    pub conflicts: Vec<String>,

    /// Declared settings schema.
    #[serde(default)]
    pub settings: Vec<SettingDecl>,

    /// Declared permissions, synced to the permission store on enable.
    #[serde(default)]
    pub permissions: Vec<PermissionDecl>,

    /// Declarative hook registrations (documentation for the admin UI; the
    /// live callbacks are registered by the instance itself).
    #[serde(default)]
    pub hooks: Vec<HookDecl>,

    /// Declared routes; the auth mode here is matched against the handlers
    /// the instance registers.
    #[serde(default)]
    pub routes: Vec<RouteDecl>,

    /// Migration file references, executed by the external migration tool.
    #[serde(default)]
    pub migrations: Vec<MigrationDecl>,
}

/// Compatibility requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requires {
    /// Host version range this plugin supports (e.g. ">=1.0.0 <2.0.0").
    pub host: String,

    /// Other plugins that must be installed, enabled, and version-compatible.
    #[serde(default)]
    pub plugins: Vec<DependencyDecl>,
}

/// A dependency on another plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDecl {
    pub name: String,
    /// Version range; empty means any version.
    #[serde(default)]
    pub version: String,
}

/// Declared setting schema entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingDecl {
    pub key: String,
    /// One of: string, textarea, number, boolean, select.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub default: Option<toml::Value>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default)]
    pub options: Vec<SettingOption>,
}

/// One option of a `select` setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingOption {
    pub value: String,
    #[serde(default)]
    pub label: String,
}

/// Declared permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDecl {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

/// Declared hook registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDecl {
    pub event: String,
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub priority: i32,
}

/// Declared route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecl {
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub handler: String,
    /// One of: required, optional, none (default).
    #[serde(default)]
    pub auth: String,
}

/// Migration file reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationDecl {
    pub file: String,
    #[serde(default)]
    pub version: i32,
}

impl Manifest {
    /// Parse and validate a manifest file.
    pub fn parse_file(path: &Path) -> Result<Self, PluginError> {
        let content = std::fs::read_to_string(path).map_err(|e| PluginError::ManifestInvalid {
            path: path.display().to_string(),
            details: format!("failed to read manifest: {e}"),
        })?;
        Self::parse_str(&content, path)
    }

    /// Parse and validate manifest TOML.
    pub fn parse_str(content: &str, path: &Path) -> Result<Self, PluginError> {
        let manifest: Manifest =
            toml::from_str(content).map_err(|e| PluginError::ManifestInvalid {
                path: path.display().to_string(),
                details: e.to_string(),
            })?;

        manifest.validate(path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<(), PluginError> {
        let invalid = |details: String| PluginError::ManifestInvalid {
            path: path.display().to_string(),
            details,
        };

        if self.name.is_empty() {
            return Err(invalid("empty 'name' field".into()));
        }
        if self.version.is_empty() {
            return Err(invalid(format!("plugin '{}': empty 'version' field", self.name)));
        }
        if self.title.is_empty() {
            return Err(invalid(format!("plugin '{}': empty 'title' field", self.name)));
        }
        if self.requires.host.is_empty() {
            return Err(invalid(format!(
                "plugin '{}': empty 'requires.host' field",
                self.name
            )));
        }

        // Catch bad versions and ranges at load time instead of at enable.
        if let Err(e) = version::SemVer::parse(&self.version) {
            return Err(invalid(format!("plugin '{}': {e}", self.name)));
        }
        if let Err(e) = version::parse_range(&self.requires.host) {
            return Err(invalid(format!("plugin '{}': requires.host: {e}", self.name)));
        }

        Ok(())
    }

    /// Names of declared dependencies.
    pub fn dependency_names(&self) -> Vec<String> {
        self.requires.plugins.iter().map(|d| d.name.clone()).collect()
    }

    /// True when this manifest declares `name` as a dependency.
    pub fn depends_on(&self, name: &str) -> bool {
        self.requires.plugins.iter().any(|d| d.name == name)
    }

    /// Find the declared setting schema for a key.
    pub fn setting(&self, key: &str) -> Option<&SettingDecl> {
        self.settings.iter().find(|s| s.key == key)
    }
}
