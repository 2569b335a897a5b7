//! Admin-facing catalog of known plugins.
//!
//! The catalog merges three inputs: the discovery set, discovery failures,
//! and installation records. It is a read model only; building it never
//! fails. When the installation store is unreachable every entry degrades
//! to "not installed" instead of erroring the whole listing.

use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use crate::loader::{DiscoveredPlugin, DiscoveryFailure};
use crate::plugin::PluginStatus;
use crate::store::InstallRecord;

/// Listing status of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogStatus {
    NotInstalled,
    Disabled,
    Enabled,
    Error,
}

impl From<PluginStatus> for CatalogStatus {
    fn from(status: PluginStatus) -> Self {
        match status {
            PluginStatus::Disabled => Self::Disabled,
            PluginStatus::Enabled => Self::Enabled,
            PluginStatus::Error => Self::Error,
        }
    }
}

/// One row of the admin catalog listing.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub title: String,
    /// Version of the available manifest; for records whose files are gone,
    /// the installed version.
    pub version: String,
    pub description: String,
    pub author: String,
    pub builtin: bool,
    pub installed: bool,
    pub status: CatalogStatus,
    /// Version recorded at install time, when installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// True for installed plugins whose manifest has disappeared from disk.
    pub files_missing: bool,
}

/// The merged catalog.
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Merge discoveries and records into the listing.
    ///
    /// `records` is `None` when the installation store was unreachable; the
    /// listing then shows every discovered plugin as not installed.
    pub fn build(
        discovered: &[DiscoveredPlugin],
        failures: &[DiscoveryFailure],
        records: Option<&[InstallRecord]>,
    ) -> Self {
        if records.is_none() {
            warn!("installation store unreachable, catalog degrades to not-installed");
        }
        let records = records.unwrap_or_default();

        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        for plugin in discovered {
            let manifest = &plugin.manifest;
            let record = records.iter().find(|r| r.name == manifest.name);
            seen.insert(manifest.name.clone());
            entries.push(CatalogEntry {
                name: manifest.name.clone(),
                title: manifest.title.clone(),
                version: manifest.version.clone(),
                description: manifest.description.clone(),
                author: manifest.author.clone(),
                builtin: plugin.builtin,
                installed: record.is_some(),
                status: record.map_or(CatalogStatus::NotInstalled, |r| r.status.into()),
                installed_version: record.map(|r| r.version.clone()),
                last_error: record.and_then(|r| r.last_error.clone()),
                files_missing: false,
            });
        }

        // A broken manifest still shows up, as an error row keyed by its
        // directory name.
        for failure in failures {
            let name = failure
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| failure.path.display().to_string());
            if !seen.insert(name.clone()) {
                continue;
            }
            entries.push(CatalogEntry {
                name: name.clone(),
                title: name,
                version: String::new(),
                description: String::new(),
                author: String::new(),
                builtin: false,
                installed: false,
                status: CatalogStatus::Error,
                installed_version: None,
                last_error: Some(failure.error.to_string()),
                files_missing: false,
            });
        }

        // Installed plugins whose files vanished keep their row so the admin
        // can still see and uninstall them.
        for record in records {
            if seen.contains(&record.name) {
                continue;
            }
            entries.push(CatalogEntry {
                name: record.name.clone(),
                title: record.name.clone(),
                version: record.version.clone(),
                description: String::new(),
                author: String::new(),
                builtin: false,
                installed: true,
                status: record.status.into(),
                installed_version: Some(record.version.clone()),
                last_error: record.last_error.clone(),
                files_missing: true,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::manifest::Manifest;
    use std::path::{Path, PathBuf};

    fn discovered(name: &str, version: &str) -> DiscoveredPlugin {
        let manifest = Manifest::parse_str(
            &format!(
                "name = \"{name}\"\nversion = \"{version}\"\ntitle = \"{name}\"\n\n[requires]\nhost = \">=1.0.0\"\n"
            ),
            Path::new("plugin.toml"),
        )
        .unwrap();
        DiscoveredPlugin {
            manifest,
            base_path: PathBuf::new(),
            instance: None,
            builtin: false,
        }
    }

    #[test]
    fn merges_records_with_discoveries() {
        let plugins = [discovered("banner", "1.1.0"), discovered("wordfilter", "0.5.0")];
        let mut record = InstallRecord::new("banner", "1.0.0");
        record.status = crate::plugin::PluginStatus::Enabled;

        let catalog = Catalog::build(&plugins, &[], Some(&[record]));

        let banner = catalog.get("banner").unwrap();
        assert!(banner.installed);
        assert_eq!(banner.status, CatalogStatus::Enabled);
        assert_eq!(banner.installed_version.as_deref(), Some("1.0.0"));
        assert_eq!(banner.version, "1.1.0");

        let wordfilter = catalog.get("wordfilter").unwrap();
        assert!(!wordfilter.installed);
        assert_eq!(wordfilter.status, CatalogStatus::NotInstalled);
    }

    #[test]
    fn unreachable_store_degrades_to_not_installed() {
        let plugins = [discovered("banner", "1.0.0")];
        let catalog = Catalog::build(&plugins, &[], None);

        let banner = catalog.get("banner").unwrap();
        assert!(!banner.installed);
        assert_eq!(banner.status, CatalogStatus::NotInstalled);
    }

    #[test]
    fn discovery_failures_become_error_rows() {
        let failure = DiscoveryFailure {
            path: PathBuf::from("/srv/plugins/broken"),
            error: PluginError::ManifestInvalid {
                path: "/srv/plugins/broken/plugin.toml".into(),
                details: "empty 'name' field".into(),
            },
        };

        let catalog = Catalog::build(&[], &[failure], Some(&[]));
        let entry = catalog.get("broken").unwrap();
        assert_eq!(entry.status, CatalogStatus::Error);
        assert!(entry.last_error.as_ref().unwrap().contains("empty 'name'"));
    }

    #[test]
    fn installed_plugin_with_missing_files_keeps_its_row() {
        let record = InstallRecord::new("ghost", "0.9.0");
        let catalog = Catalog::build(&[], &[], Some(&[record]));

        let ghost = catalog.get("ghost").unwrap();
        assert!(ghost.installed);
        assert!(ghost.files_missing);
        assert_eq!(ghost.version, "0.9.0");
    }
}
