//! Plugin administration API under `/api/admin/plugins`.
//!
//! Every route is gated by the admin bearer token. Errors come back as
//! `{"error": {"kind", "message"}}` with a status matching the kind.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{AppError, AppResult};
use crate::middleware::require_admin;
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/admin/plugins", get(list_catalog))
        .route("/api/admin/plugins/overview", get(overview))
        .route("/api/admin/plugins/events", get(events))
        .route("/api/admin/plugins/health", get(health))
        .route("/api/admin/plugins/tasks", get(tasks))
        .route("/api/admin/plugins/rate-limits", get(rate_limits))
        .route("/api/admin/plugins/routes", get(routes_view))
        .route("/api/admin/plugins/subscriptions", get(subscriptions))
        .route("/api/admin/plugins/metrics", get(metrics_all))
        .route("/api/admin/plugins/{name}", get(detail).delete(uninstall))
        .route("/api/admin/plugins/{name}/install", post(install))
        .route("/api/admin/plugins/{name}/enable", post(enable))
        .route("/api/admin/plugins/{name}/disable", post(disable))
        .route(
            "/api/admin/plugins/{name}/settings",
            get(get_settings).put(put_settings),
        )
        .route("/api/admin/plugins/{name}/permissions", get(permissions))
        .route(
            "/api/admin/plugins/{name}/permissions/{id}",
            put(put_permission_level),
        )
        .route("/api/admin/plugins/{name}/metrics", get(metrics_one))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ))
}

/// Acting admin identity for the audit trail.
fn actor(headers: &HeaderMap) -> String {
    headers
        .get("x-admin-actor")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| "admin".to_string(), str::to_string)
}

async fn list_catalog(State(state): State<AppState>) -> Json<Value> {
    let catalog = state.lifecycle().catalog().await;
    Json(json!({ "plugins": catalog.entries }))
}

async fn overview(State(state): State<AppState>) -> Json<Value> {
    let overview = state.lifecycle().overview().await;
    Json(json!(overview))
}

async fn detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    let catalog = state.lifecycle().catalog().await;
    let entry = catalog.get(&name).ok_or(AppError::NotFound)?;
    Ok(Json(json!({
        "plugin": entry,
        "runtime": state.runtime().info(&name),
    })))
}

async fn install(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    state.lifecycle().install(&name, &actor(&headers)).await?;
    Ok(Json(json!({ "status": "installed" })))
}

async fn enable(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    state.lifecycle().enable(&name, &actor(&headers)).await?;
    Ok(Json(json!({ "status": "enabled" })))
}

async fn disable(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    state.lifecycle().disable(&name, &actor(&headers)).await?;
    Ok(Json(json!({ "status": "disabled" })))
}

async fn uninstall(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    state.lifecycle().uninstall(&name, &actor(&headers)).await?;
    Ok(Json(json!({ "status": "uninstalled" })))
}

async fn get_settings(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    let settings = state.lifecycle().current_settings(&name).await?;
    Ok(Json(json!({ "settings": settings })))
}

async fn put_settings(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(values): Json<HashMap<String, String>>,
) -> AppResult<Json<Value>> {
    state
        .lifecycle()
        .update_settings(&name, &values, &actor(&headers))
        .await?;
    Ok(Json(json!({ "status": "updated" })))
}

async fn permissions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    let permissions = state.lifecycle().stores().permissions.list(&name).await?;
    Ok(Json(json!({ "permissions": permissions })))
}

#[derive(Deserialize)]
struct LevelBody {
    min_level: i32,
}

async fn put_permission_level(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    Json(body): Json<LevelBody>,
) -> AppResult<Json<Value>> {
    let updated = state
        .lifecycle()
        .stores()
        .permissions
        .set_level(&name, &id, body.min_level)
        .await?;
    if !updated {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "status": "updated" })))
}

#[derive(Deserialize)]
struct EventsQuery {
    plugin: Option<String>,
    limit: Option<usize>,
}

async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> AppResult<Json<Value>> {
    let events = state
        .lifecycle()
        .events(query.plugin.as_deref(), query.limit.unwrap_or(50))
        .await?;
    Ok(Json(json!({ "events": events })))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "plugins": state.runtime().health() }))
}

async fn tasks(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tasks": state.runtime().scheduler().tasks() }))
}

async fn rate_limits(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "rate_limits": state.runtime().rate_limiter().limits() }))
}

async fn routes_view(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "routes": state.runtime().routes().routes() }))
}

async fn subscriptions(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "subscriptions": state.runtime().events().subscriptions() }))
}

async fn metrics_all(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "metrics": state.runtime().metrics().snapshot() }))
}

async fn metrics_one(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Value>> {
    let metrics = state.runtime().metrics().plugin(&name).ok_or(AppError::NotFound)?;
    Ok(Json(json!({ "metrics": metrics })))
}
