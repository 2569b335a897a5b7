//! Plugin runtime error types with clear, actionable messages.
//!
//! Every error carries the plugin name and enough context for an operator
//! to act on it without reading the runtime source.

use thiserror::Error;

/// Errors produced by the plugin runtime and lifecycle orchestrator.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A `plugin.toml` manifest is missing required fields or unparseable.
    #[error("plugin manifest at '{path}': {details}")]
    ManifestInvalid { path: String, details: String },

    /// A version string is not `major.minor.patch`.
    #[error("invalid version {0:?} (expected x.y.z)")]
    InvalidVersion(String),

    /// A version range expression could not be parsed.
    #[error("invalid version range {0:?}")]
    InvalidRange(String),

    /// A version does not satisfy a required range.
    #[error("version {version} does not satisfy constraint {range:?}")]
    VersionMismatch { version: String, range: String },

    /// Plugin is not known to the catalog or runtime.
    #[error("plugin '{0}' not found")]
    NotFound(String),

    /// Install was requested for a plugin that already has a record.
    #[error("plugin '{0}' is already installed")]
    AlreadyInstalled(String),

    /// A declared dependency is missing, disabled, or version-incompatible.
    #[error("plugin '{plugin}': dependency '{dependency}' not satisfied: {reason}")]
    DependencyUnsatisfied {
        plugin: String,
        dependency: String,
        reason: String,
    },

    /// The plugin conflicts with an enabled plugin (in either direction).
    #[error("plugin '{plugin}' conflicts with enabled plugin '{other}'")]
    ConflictDetected { plugin: String, other: String },

    /// Other enabled plugins depend on this one.
    #[error("plugin '{plugin}' is required by enabled plugins: {dependents}")]
    DependentsBlocking { plugin: String, dependents: String },

    /// The plugin's `initialize` call failed.
    #[error("plugin '{plugin}' failed to initialize: {details}")]
    InitializationFailed { plugin: String, details: String },

    /// A route declared auth "required" was called without credentials.
    #[error("authentication required")]
    AuthRequired,

    /// Presented credentials did not verify.
    #[error("invalid credentials")]
    AuthInvalid,

    /// The per-plugin request budget was exhausted.
    #[error("plugin '{plugin}': rate limit exceeded ({limit} requests per {window_secs}s)")]
    RateLimitExceeded {
        plugin: String,
        limit: u32,
        window_secs: u64,
    },

    /// Plugin-owned code panicked inside the sandbox.
    #[error("plugin '{plugin}' panicked: {message}")]
    SandboxPanic { plugin: String, message: String },

    /// Plugin-owned code exceeded its sandbox deadline.
    #[error("plugin '{plugin}' timed out after {timeout_secs}s")]
    SandboxTimeout { plugin: String, timeout_secs: u64 },

    /// A setting value failed its declared schema.
    #[error("setting '{key}': {details}")]
    SettingValidationFailed { key: String, details: String },

    /// A setting key is not declared in the plugin's manifest.
    #[error("setting '{key}' is not declared by plugin '{plugin}'")]
    UnknownSettingKey { plugin: String, key: String },

    /// A storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl PluginError {
    /// Stable machine-readable kind, used by the admin HTTP surface.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ManifestInvalid { .. } => "manifest_invalid",
            Self::InvalidVersion(_) => "invalid_version",
            Self::InvalidRange(_) => "invalid_range",
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::NotFound(_) => "not_found",
            Self::AlreadyInstalled(_) => "already_installed",
            Self::DependencyUnsatisfied { .. } => "dependency_unsatisfied",
            Self::ConflictDetected { .. } => "conflict_detected",
            Self::DependentsBlocking { .. } => "dependents_blocking",
            Self::InitializationFailed { .. } => "initialization_failed",
            Self::AuthRequired => "auth_required",
            Self::AuthInvalid => "auth_invalid",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::SandboxPanic { .. } => "sandbox_panic",
            Self::SandboxTimeout { .. } => "sandbox_timeout",
            Self::SettingValidationFailed { .. } => "setting_validation_failed",
            Self::UnknownSettingKey { .. } => "unknown_setting_key",
            Self::Storage(_) => "storage",
        }
    }
}
