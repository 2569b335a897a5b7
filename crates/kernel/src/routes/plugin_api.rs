//! Dispatch for plugin-owned routes under `/api/plugins/{plugin}/`.
//!
//! The dispatch table never shrinks, so the live status check here is what
//! makes disabling a plugin take effect: a disabled plugin's routes stay
//! mounted but answer 403 until it is enabled again. Each request then
//! passes rate limiting, the manifest's auth mode, and runs inside the
//! sandbox with metrics recorded on the way out.

use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::any;

use agora_runtime::plugin::PluginStatus;
use agora_runtime::ratelimit::RateLimitStatus;
use agora_runtime::registry::AuthMode;
use agora_runtime::{PluginError, sandbox};

use crate::error::AppError;
use crate::middleware::{AuthContext, bearer_token, client_key, token_matches};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/plugins/{plugin}/{*rest}", any(dispatch))
}

async fn dispatch(
    State(state): State<AppState>,
    Path((plugin, rest)): Path<(String, String)>,
    mut request: Request<Body>,
) -> Response {
    let path = format!("/{rest}");

    // Live status first: mounted routes of a disabled plugin must reject.
    match state.runtime().status(&plugin) {
        Some(PluginStatus::Enabled) => {}
        Some(_) => return AppError::PluginDisabled(plugin).into_response(),
        None => return AppError::Plugin(PluginError::NotFound(plugin)).into_response(),
    }

    let Some(resolved) = state
        .runtime()
        .routes()
        .resolve(&plugin, request.method(), &path)
    else {
        return AppError::NotFound.into_response();
    };

    let client = client_key(request.headers());
    let budget = match state.runtime().rate_limiter().check(&plugin, &client).await {
        Ok(budget) => budget,
        Err(e) => {
            let budget_headers = rejected_budget_headers(&e);
            let mut response = AppError::Plugin(e).into_response();
            response.headers_mut().extend(budget_headers);
            return response;
        }
    };

    match resolved.auth {
        AuthMode::Required => match authenticate(&state, request.headers()) {
            Ok(ctx) => {
                request.extensions_mut().insert(ctx);
            }
            Err(e) => return AppError::Plugin(e).into_response(),
        },
        AuthMode::Optional => {
            if bearer_token(request.headers()).is_some() {
                match authenticate(&state, request.headers()) {
                    Ok(ctx) => {
                        request.extensions_mut().insert(ctx);
                    }
                    Err(e) => return AppError::Plugin(e).into_response(),
                }
            }
        }
        AuthMode::None => {}
    }

    request.extensions_mut().insert(resolved.params.clone());

    let endpoint = format!("{} {}", request.method(), resolved.pattern);
    let started = Instant::now();
    let mut response = sandbox::guard_request(
        &plugin,
        state.runtime().sandbox(),
        (resolved.handler)(request),
    )
    .await;

    let is_error = response.status().is_client_error() || response.status().is_server_error();
    state
        .runtime()
        .metrics()
        .record_request(&plugin, &endpoint, started.elapsed(), is_error);

    if let Some(budget) = budget {
        response.headers_mut().extend(budget_headers(budget));
    }
    response
}

/// Verify a bearer token against the host's member API token.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, PluginError> {
    let token = bearer_token(headers).ok_or(PluginError::AuthRequired)?;
    let expected = state
        .config()
        .api_token
        .as_deref()
        .ok_or(PluginError::AuthInvalid)?;
    if token_matches(token, expected) {
        Ok(AuthContext {
            subject: "member".to_string(),
        })
    } else {
        Err(PluginError::AuthInvalid)
    }
}

fn budget_headers(budget: RateLimitStatus) -> HeaderMap {
    header_map(&[
        ("x-ratelimit-limit", budget.limit.to_string()),
        ("x-ratelimit-remaining", budget.remaining.to_string()),
        ("x-ratelimit-window", budget.window_secs.to_string()),
    ])
}

fn rejected_budget_headers(error: &PluginError) -> HeaderMap {
    match error {
        PluginError::RateLimitExceeded {
            limit, window_secs, ..
        } => header_map(&[
            ("x-ratelimit-limit", limit.to_string()),
            ("x-ratelimit-remaining", "0".to_string()),
            ("x-ratelimit-window", window_secs.to_string()),
            ("retry-after", window_secs.to_string()),
        ]),
        _ => HeaderMap::new(),
    }
}

fn header_map(pairs: &[(&'static str, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(*name, value);
        }
    }
    headers
}
