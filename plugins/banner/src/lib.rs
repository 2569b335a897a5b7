//! Built-in banner rotation plugin.
//!
//! Serves rotating promotional banners with click and view tracking, injects
//! banner markup into rendered content through the filter chain, and sweeps
//! expired banners on a schedule. Banner state is in-process; the plugin is
//! primarily the reference exercise of every runtime capability trait.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use agora_runtime::error::PluginError;
use agora_runtime::events::EventBus;
use agora_runtime::hooks::HookManager;
use agora_runtime::manifest::Manifest;
use agora_runtime::plugin::{
    EventAware, HealthCheckable, HookAware, Plugin, PluginContext, RateLimitAware, Schedulable,
};
use agora_runtime::ratelimit::RateLimiter;
use agora_runtime::registry::{AuthMode, RouteParams, RouteTable};
use agora_runtime::scheduler::Scheduler;

const PLUGIN_NAME: &str = "banner";
const MANIFEST_TOML: &str = include_str!("../plugin.toml");
const MAX_BODY_BYTES: usize = 64 * 1024;

const POSITIONS: &[&str] = &["header", "sidebar", "footer", "content"];

/// Parse the embedded manifest.
pub fn manifest() -> Result<Manifest, PluginError> {
    Manifest::parse_str(MANIFEST_TOML, Path::new("builtin:banner/plugin.toml"))
}

/// One banner.
#[derive(Debug, Clone, Serialize)]
pub struct Banner {
    pub id: u64,
    pub title: String,
    pub image_url: String,
    pub link_url: String,
    /// One of: header, sidebar, footer, content.
    pub position: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    pub views: u64,
    pub clicks: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct BannerInput {
    title: String,
    image_url: String,
    link_url: String,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    active: Option<bool>,
}

/// Typed settings snapshot, refreshed on every enable.
#[derive(Debug, Clone)]
struct BannerSettings {
    max_banners: usize,
    default_position: String,
    track_views: bool,
}

impl Default for BannerSettings {
    fn default() -> Self {
        Self {
            max_banners: 5,
            default_position: "header".to_string(),
            track_views: true,
        }
    }
}

/// Shared banner state, captured by route handlers and hook callbacks.
struct BannerStore {
    banners: RwLock<Vec<Banner>>,
    next_id: AtomicU64,
    settings: RwLock<BannerSettings>,
}

impl BannerStore {
    fn new() -> Self {
        Self {
            banners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            settings: RwLock::new(BannerSettings::default()),
        }
    }

    fn settings(&self) -> BannerSettings {
        self.settings.read().clone()
    }

    fn create(&self, input: BannerInput) -> Banner {
        let position = input
            .position
            .unwrap_or_else(|| self.settings.read().default_position.clone());
        let banner = Banner {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            title: input.title,
            image_url: input.image_url,
            link_url: input.link_url,
            position,
            active: input.active.unwrap_or(true),
            ends_at: input.ends_at,
            views: 0,
            clicks: 0,
            created_at: Utc::now(),
        };
        self.banners.write().push(banner.clone());
        banner
    }

    fn update(&self, id: u64, input: BannerInput) -> Option<Banner> {
        let mut banners = self.banners.write();
        let banner = banners.iter_mut().find(|b| b.id == id)?;
        banner.title = input.title;
        banner.image_url = input.image_url;
        banner.link_url = input.link_url;
        if let Some(position) = input.position {
            banner.position = position;
        }
        banner.ends_at = input.ends_at;
        if let Some(active) = input.active {
            banner.active = active;
        }
        Some(banner.clone())
    }

    fn delete(&self, id: u64) -> bool {
        let mut banners = self.banners.write();
        let before = banners.len();
        banners.retain(|b| b.id != id);
        banners.len() != before
    }

    fn all(&self) -> Vec<Banner> {
        self.banners.read().clone()
    }

    /// Active, unexpired banners for a position, oldest first, capped at
    /// the configured maximum.
    fn active(&self, now: DateTime<Utc>, position: Option<&str>) -> Vec<Banner> {
        let max = self.settings.read().max_banners;
        self.banners
            .read()
            .iter()
            .filter(|b| b.active && b.ends_at.is_none_or(|end| end > now))
            .filter(|b| position.is_none_or(|p| b.position == p))
            .take(max)
            .cloned()
            .collect()
    }

    fn record_view(&self, id: u64) -> bool {
        let mut banners = self.banners.write();
        match banners.iter_mut().find(|b| b.id == id) {
            Some(b) => {
                b.views += 1;
                true
            }
            None => false,
        }
    }

    fn record_views(&self, ids: &[u64]) {
        let mut banners = self.banners.write();
        for banner in banners.iter_mut() {
            if ids.contains(&banner.id) {
                banner.views += 1;
            }
        }
    }

    /// Record a click and hand back the target URL.
    fn record_click(&self, id: u64) -> Option<String> {
        let mut banners = self.banners.write();
        let banner = banners.iter_mut().find(|b| b.id == id)?;
        banner.clicks += 1;
        Some(banner.link_url.clone())
    }

    /// Deactivate banners whose end date has passed. Returns how many
    /// were swept.
    fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut banners = self.banners.write();
        let mut swept = 0;
        for banner in banners.iter_mut() {
            if banner.active && banner.ends_at.is_some_and(|end| end <= now) {
                banner.active = false;
                swept += 1;
            }
        }
        swept
    }

    fn markup_for(&self, now: DateTime<Utc>, position: &str) -> String {
        let mut html = String::new();
        for banner in self.active(now, Some(position)) {
            html.push_str(&format!(
                "<div class=\"plugin-banner plugin-banner-{}\" data-banner-id=\"{}\">\
                 <a href=\"{}\"><img src=\"{}\" alt=\"{}\"/></a></div>",
                banner.position, banner.id, banner.link_url, banner.image_url, banner.title,
            ));
        }
        html
    }
}

/// The banner plugin instance registered with the host.
pub struct BannerPlugin {
    store: Arc<BannerStore>,
}

impl Default for BannerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl BannerPlugin {
    pub fn new() -> Self {
        Self {
            store: Arc::new(BannerStore::new()),
        }
    }

    /// Shared instance for builtin registration.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl Plugin for BannerPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn initialize(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        let _span = ctx.span().entered();

        let mut settings = BannerSettings::default();
        if let Some(max) = ctx.setting_number("max_banners") {
            settings.max_banners = max as usize;
        }
        if let Some(position) = ctx.setting_str("default_position") {
            settings.default_position = position.to_string();
        }
        if let Some(track) = ctx.setting_bool("track_views") {
            settings.track_views = track;
        }
        *self.store.settings.write() = settings;

        info!("banner plugin initialized");
        Ok(())
    }

    fn register_routes(&self, routes: &mut RouteTable) {
        let store = Arc::clone(&self.store);
        routes.get("/active", AuthMode::None, move |req| {
            let store = Arc::clone(&store);
            async move { list_active(&store, &req) }
        });

        let store = Arc::clone(&self.store);
        routes.post("/banners/{id}/click", AuthMode::None, move |req| {
            let store = Arc::clone(&store);
            async move { track_click(&store, &req) }
        });

        let store = Arc::clone(&self.store);
        routes.post("/banners/{id}/view", AuthMode::None, move |req| {
            let store = Arc::clone(&store);
            async move { track_view(&store, &req) }
        });

        let store = Arc::clone(&self.store);
        routes.get("/banners", AuthMode::Required, move |_req| {
            let store = Arc::clone(&store);
            async move { json_ok(json!({ "banners": store.all() })) }
        });

        let store = Arc::clone(&self.store);
        routes.post("/banners", AuthMode::Required, move |req| {
            let store = Arc::clone(&store);
            async move { create_banner(&store, req).await }
        });

        let store = Arc::clone(&self.store);
        routes.route(Method::PUT, "/banners/{id}", AuthMode::Required, move |req| {
            let store = Arc::clone(&store);
            async move { update_banner(&store, req).await }
        });

        let store = Arc::clone(&self.store);
        routes.delete("/banners/{id}", AuthMode::Required, move |req| {
            let store = Arc::clone(&store);
            async move { delete_banner(&store, &req) }
        });

        let store = Arc::clone(&self.store);
        routes.get("/stats", AuthMode::Required, move |_req| {
            let store = Arc::clone(&store);
            async move { banner_stats(&store) }
        });
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        debug!(plugin = PLUGIN_NAME, "shutting down");
        Ok(())
    }

    fn hooks(&self) -> Option<&dyn HookAware> {
        Some(self)
    }

    fn schedules(&self) -> Option<&dyn Schedulable> {
        Some(self)
    }

    fn rate_limit(&self) -> Option<&dyn RateLimitAware> {
        Some(self)
    }

    fn events(&self) -> Option<&dyn EventAware> {
        Some(self)
    }

    fn health(&self) -> Option<&dyn HealthCheckable> {
        Some(self)
    }
}

impl HookAware for BannerPlugin {
    fn register_hooks(&self, hooks: &HookManager) {
        let store = Arc::clone(&self.store);
        hooks.register_filter("content_render", PLUGIN_NAME, 50, move |ctx| {
            let markup = store.markup_for(Utc::now(), "content");
            if markup.is_empty() {
                return Ok(());
            }
            match &ctx.input {
                Value::String(html) => {
                    ctx.set_output(Value::String(format!("{html}{markup}")));
                }
                Value::Object(fields) => {
                    if let Some(Value::String(html)) = fields.get("html") {
                        let mut fields = fields.clone();
                        fields.insert("html".to_string(), Value::String(format!("{html}{markup}")));
                        ctx.set_output(Value::Object(fields));
                    }
                }
                _ => {}
            }
            Ok(())
        });

        hooks.register_filter("admin_menu", PLUGIN_NAME, 100, |ctx| {
            if let Value::Array(entries) = &ctx.input {
                let mut entries = entries.clone();
                entries.push(json!({
                    "title": "Banners",
                    "href": "/admin/plugins/banner",
                    "icon": "flag",
                }));
                ctx.set_output(Value::Array(entries));
            }
            Ok(())
        });
    }
}

impl Schedulable for BannerPlugin {
    fn register_schedules(&self, scheduler: &Scheduler) {
        let store = Arc::clone(&self.store);
        scheduler.register(PLUGIN_NAME, "expire_sweep", Duration::from_secs(3600), move || {
            let store = Arc::clone(&store);
            async move {
                let swept = store.sweep_expired(Utc::now());
                if swept > 0 {
                    info!(swept, "deactivated expired banners");
                }
                Ok(())
            }
        });
    }
}

impl RateLimitAware for BannerPlugin {
    fn configure_rate_limit(&self, limiter: &RateLimiter) {
        limiter.set_limit(PLUGIN_NAME, 120, Duration::from_secs(60));
    }
}

impl EventAware for BannerPlugin {
    fn register_events(&self, bus: &Arc<EventBus>) {
        let store = Arc::clone(&self.store);
        bus.subscribe(PLUGIN_NAME, "banner.refresh", move |_event| {
            let swept = store.sweep_expired(Utc::now());
            debug!(swept, "refresh event handled");
        });
    }
}

impl HealthCheckable for BannerPlugin {
    fn health_check(&self) -> anyhow::Result<()> {
        let settings = self.store.settings();
        if settings.max_banners == 0 {
            anyhow::bail!("max_banners is zero, no banners can be served");
        }
        Ok(())
    }
}

fn list_active(store: &BannerStore, req: &Request<Body>) -> Response {
    let position = query_param(req.uri(), "position");
    if let Some(p) = position.as_deref()
        && !POSITIONS.contains(&p)
    {
        return json_error(StatusCode::BAD_REQUEST, "bad_request", "unknown position");
    }

    let banners = store.active(Utc::now(), position.as_deref());
    if store.settings().track_views {
        let ids: Vec<u64> = banners.iter().map(|b| b.id).collect();
        store.record_views(&ids);
    }
    json_ok(json!({ "banners": banners }))
}

fn track_click(store: &BannerStore, req: &Request<Body>) -> Response {
    let Some(id) = path_id(req) else {
        return json_error(StatusCode::BAD_REQUEST, "bad_request", "invalid banner id");
    };
    match store.record_click(id) {
        Some(link_url) => json_ok(json!({ "clicked": true, "link_url": link_url })),
        None => banner_not_found(),
    }
}

fn track_view(store: &BannerStore, req: &Request<Body>) -> Response {
    let Some(id) = path_id(req) else {
        return json_error(StatusCode::BAD_REQUEST, "bad_request", "invalid banner id");
    };
    if store.record_view(id) {
        json_ok(json!({ "viewed": true }))
    } else {
        banner_not_found()
    }
}

async fn create_banner(store: &BannerStore, req: Request<Body>) -> Response {
    let input = match read_input(req).await {
        Ok(input) => input,
        Err(response) => return response,
    };
    let banner = store.create(input);
    (StatusCode::CREATED, axum::Json(json!({ "banner": banner }))).into_response()
}

async fn update_banner(store: &BannerStore, req: Request<Body>) -> Response {
    let Some(id) = path_id(&req) else {
        return json_error(StatusCode::BAD_REQUEST, "bad_request", "invalid banner id");
    };
    let input = match read_input(req).await {
        Ok(input) => input,
        Err(response) => return response,
    };
    match store.update(id, input) {
        Some(banner) => json_ok(json!({ "banner": banner })),
        None => banner_not_found(),
    }
}

fn delete_banner(store: &BannerStore, req: &Request<Body>) -> Response {
    let Some(id) = path_id(req) else {
        return json_error(StatusCode::BAD_REQUEST, "bad_request", "invalid banner id");
    };
    if store.delete(id) {
        json_ok(json!({ "deleted": true }))
    } else {
        banner_not_found()
    }
}

fn banner_stats(store: &BannerStore) -> Response {
    let banners = store.all();
    let stats: Vec<Value> = banners
        .iter()
        .map(|b| {
            json!({
                "id": b.id,
                "title": b.title,
                "views": b.views,
                "clicks": b.clicks,
                "active": b.active,
            })
        })
        .collect();
    let total_views: u64 = banners.iter().map(|b| b.views).sum();
    let total_clicks: u64 = banners.iter().map(|b| b.clicks).sum();
    json_ok(json!({
        "banners": stats,
        "total_views": total_views,
        "total_clicks": total_clicks,
    }))
}

/// Parse and validate a banner payload from the request body.
async fn read_input(req: Request<Body>) -> Result<BannerInput, Response> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "bad_request", "unreadable body"))?;
    let input: BannerInput = serde_json::from_slice(&bytes)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "bad_request", &e.to_string()))?;

    if input.title.is_empty() || input.image_url.is_empty() || input.link_url.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "title, image_url, and link_url are required",
        ));
    }
    if let Some(p) = input.position.as_deref()
        && !POSITIONS.contains(&p)
    {
        return Err(json_error(StatusCode::BAD_REQUEST, "bad_request", "unknown position"));
    }
    Ok(input)
}

/// The `{id}` path parameter captured by the dispatcher.
fn path_id(req: &Request<Body>) -> Option<u64> {
    req.extensions()
        .get::<RouteParams>()
        .and_then(|params| params.get("id"))
        .and_then(|id| id.parse().ok())
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn json_ok(value: Value) -> Response {
    axum::Json(value).into_response()
}

fn json_error(status: StatusCode, kind: &str, message: &str) -> Response {
    (
        status,
        axum::Json(json!({ "error": { "kind": kind, "message": message } })),
    )
        .into_response()
}

fn banner_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "no such banner")
}
