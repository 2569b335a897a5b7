//! Fault containment around plugin-owned code.
//!
//! Two independent guards, each toggleable: panic recovery (a panicking
//! handler becomes a logged error or 500 response, never a crashed host)
//! and an advisory deadline (a handler that exceeds it yields a 504; the
//! handler itself is only cancelled, never preempted).

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use serde_json::json;
use tracing::{error, warn};

use crate::error::PluginError;
use crate::hooks::panic_message;

/// Sandbox configuration for plugin-owned code.
#[derive(Debug, Clone, Copy)]
pub struct SandboxConfig {
    /// Deadline for request handlers; zero disables the timeout.
    pub request_timeout: Duration,
    /// Convert panics into errors/responses instead of unwinding the host.
    pub recover_panics: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            recover_panics: true,
        }
    }
}

/// Call a synchronous plugin function, converting a panic into an error.
pub fn safe_call<T>(plugin: &str, f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(&panic);
            error!(plugin, panic = %message, "plugin panicked during call");
            Err(PluginError::SandboxPanic {
                plugin: plugin.to_string(),
                message,
            }
            .into())
        }
    }
}

/// Await a plugin future, converting a panic into an error.
///
/// Used for scheduler- and event-triggered plugin calls that have no
/// request/response pair to guard.
pub async fn safe_call_future<T, F>(plugin: &str, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(&panic);
            error!(plugin, panic = %message, "plugin panicked during call");
            Err(PluginError::SandboxPanic {
                plugin: plugin.to_string(),
                message,
            }
            .into())
        }
    }
}

/// Run a plugin request handler under the sandbox, producing a response in
/// every outcome: the handler's own, a 504 on deadline, or a 500 on panic.
/// Panic internals are logged, never leaked to the client.
pub async fn guard_request<F>(plugin: &str, config: SandboxConfig, handler: F) -> Response
where
    F: Future<Output = Response>,
{
    let guarded = async {
        if config.recover_panics {
            match AssertUnwindSafe(handler).catch_unwind().await {
                Ok(response) => response,
                Err(panic) => {
                    error!(
                        plugin,
                        panic = %panic_message(&panic),
                        "plugin handler panicked"
                    );
                    panic_response(plugin)
                }
            }
        } else {
            handler.await
        }
    };

    if config.request_timeout.is_zero() {
        return guarded.await;
    }

    match tokio::time::timeout(config.request_timeout, guarded).await {
        Ok(response) => response,
        Err(_) => {
            warn!(
                plugin,
                timeout_secs = config.request_timeout.as_secs(),
                "plugin request timed out"
            );
            timeout_response(plugin, config.request_timeout.as_secs())
        }
    }
}

/// 500 response for a recovered panic, without leaking panic internals.
pub fn panic_response(plugin: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": {
                "kind": "sandbox_panic",
                "message": format!("plugin '{plugin}' encountered an internal error"),
            }
        })),
    )
        .into_response()
}

/// 504 response for an exceeded deadline.
pub fn timeout_response(plugin: &str, timeout_secs: u64) -> Response {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Json(json!({
            "error": {
                "kind": "sandbox_timeout",
                "message": format!("plugin '{plugin}' did not respond within {timeout_secs}s"),
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn safe_call_passes_results_through() {
        let out = safe_call("p", || Ok(41 + 1)).unwrap();
        assert_eq!(out, 42);

        let err = safe_call::<()>("p", || anyhow::bail!("plain failure")).unwrap_err();
        assert!(err.to_string().contains("plain failure"));
    }

    #[test]
    fn safe_call_catches_panics() {
        let err = safe_call::<()>("banner", || panic!("handler exploded")).unwrap_err();
        let plugin_err = err.downcast_ref::<PluginError>().unwrap();
        assert!(matches!(plugin_err, PluginError::SandboxPanic { .. }));
        assert!(err.to_string().contains("banner"));
    }

    #[tokio::test]
    async fn safe_call_future_catches_panics() {
        let err = safe_call_future::<(), _>("banner", async { panic!("async explosion") })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PluginError>(),
            Some(PluginError::SandboxPanic { .. })
        ));
    }

    #[tokio::test]
    async fn guard_request_returns_handler_response() {
        let config = SandboxConfig::default();
        let response = guard_request("p", config, async {
            (StatusCode::OK, "fine").into_response()
        })
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn guard_request_converts_panic_to_500() {
        let config = SandboxConfig::default();
        let response = guard_request("p", config, async {
            panic!("request handler exploded");
        })
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn guard_request_times_out_without_hanging_the_caller() {
        let config = SandboxConfig {
            request_timeout: Duration::from_millis(50),
            recover_panics: true,
        };
        let response = guard_request("p", config, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            (StatusCode::OK, "too late").into_response()
        })
        .await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn panics_still_recovered_with_timeout_disabled() {
        let config = SandboxConfig {
            request_timeout: Duration::ZERO,
            recover_panics: true,
        };
        let response = guard_request("p", config, async {
            panic!("boom");
        })
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
