//! Application error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use agora_runtime::PluginError;

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("plugin '{0}' is disabled")]
    PluginDisabled(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Plugin(e) => e.kind(),
            AppError::PluginDisabled(_) => "plugin_disabled",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Plugin(e) => plugin_status(e),
            AppError::PluginDisabled(_) => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn plugin_status(error: &PluginError) -> StatusCode {
    match error {
        PluginError::NotFound(_) => StatusCode::NOT_FOUND,
        PluginError::AlreadyInstalled(_)
        | PluginError::DependencyUnsatisfied { .. }
        | PluginError::ConflictDetected { .. }
        | PluginError::DependentsBlocking { .. }
        | PluginError::VersionMismatch { .. } => StatusCode::CONFLICT,
        PluginError::ManifestInvalid { .. }
        | PluginError::InvalidVersion(_)
        | PluginError::InvalidRange(_)
        | PluginError::SettingValidationFailed { .. }
        | PluginError::UnknownSettingKey { .. } => StatusCode::BAD_REQUEST,
        PluginError::AuthRequired | PluginError::AuthInvalid => StatusCode::UNAUTHORIZED,
        PluginError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        PluginError::SandboxTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PluginError::SandboxPanic { .. }
        | PluginError::InitializationFailed { .. }
        | PluginError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server-side faults get logged with detail and a vague body.
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
                "internal server error".to_string()
            }
            AppError::Plugin(PluginError::Storage(e)) => {
                tracing::error!(error = %e, "storage error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(json!({ "error": { "kind": self.kind(), "message": message } })),
        )
            .into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn plugin_errors_map_to_expected_statuses() {
        let cases: Vec<(PluginError, StatusCode)> = vec![
            (PluginError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (PluginError::AlreadyInstalled("x".into()), StatusCode::CONFLICT),
            (
                PluginError::DependentsBlocking {
                    plugin: "a".into(),
                    dependents: "b".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                PluginError::RateLimitExceeded {
                    plugin: "a".into(),
                    limit: 3,
                    window_secs: 60,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                PluginError::SandboxTimeout {
                    plugin: "a".into(),
                    timeout_secs: 30,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (PluginError::AuthRequired, StatusCode::UNAUTHORIZED),
        ];

        for (error, expected) in cases {
            assert_eq!(AppError::Plugin(error).status(), expected);
        }
    }
}
