//! Plugin route registration and dispatch lookup.
//!
//! Routes mount under `/api/plugins/{plugin}/` exactly once per process
//! lifetime. Disabling a plugin does not unmount anything; the dispatcher
//! checks live status per request, so a disabled plugin's routes answer 403
//! and re-enabling needs no re-mount.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

/// Boxed response future returned by plugin handlers.
pub type BoxedHandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A plugin's request handler.
pub type PluginHandler = Arc<dyn Fn(Request<Body>) -> BoxedHandlerFuture + Send + Sync>;

/// Authentication requirement of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Anonymous access allowed.
    None,
    /// Credentials verified when present, anonymous still allowed.
    Optional,
    /// Valid credentials mandatory.
    Required,
}

impl AuthMode {
    /// Parse a manifest auth string; empty means no auth.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "none" => Some(Self::None),
            "optional" => Some(Self::Optional),
            "required" => Some(Self::Required),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Optional => "optional",
            Self::Required => "required",
        }
    }
}

/// One registered route.
#[derive(Clone)]
pub struct RouteEntry {
    pub method: Method,
    /// Path relative to the plugin's mount point, e.g. `/active` or
    /// `/banners/{id}`.
    pub path: String,
    pub auth: AuthMode,
    pub handler: PluginHandler,
}

/// Builder a plugin fills during `register_routes`.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method and relative path.
    pub fn route<F, Fut>(&mut self, method: Method, path: &str, auth: AuthMode, handler: F)
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.routes.push(RouteEntry {
            method,
            path: path.to_string(),
            auth,
            handler: Arc::new(move |req| Box::pin(handler(req))),
        });
    }

    pub fn get<F, Fut>(&mut self, path: &str, auth: AuthMode, handler: F)
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Method::GET, path, auth, handler);
    }

    pub fn post<F, Fut>(&mut self, path: &str, auth: AuthMode, handler: F)
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Method::POST, path, auth, handler);
    }

    pub fn delete<F, Fut>(&mut self, path: &str, auth: AuthMode, handler: F)
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.route(Method::DELETE, path, auth, handler);
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }
}

/// Path parameters captured from `{name}` segments, exposed to handlers via
/// request extensions.
#[derive(Debug, Clone, Default)]
pub struct RouteParams(pub HashMap<String, String>);

impl RouteParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// A resolved route ready for dispatch.
pub struct ResolvedRoute {
    pub handler: PluginHandler,
    pub auth: AuthMode,
    pub params: RouteParams,
    /// The registered pattern, for metrics labels.
    pub pattern: String,
}

/// Route view for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub plugin: String,
    pub method: String,
    pub path: String,
    pub auth: AuthMode,
}

/// Process-lifetime route registry.
pub struct RouteRegistry {
    mounted: RwLock<HashMap<String, Vec<RouteEntry>>>,
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            mounted: RwLock::new(HashMap::new()),
        }
    }

    /// Mount a plugin's routes. Returns false (and changes nothing) when the
    /// plugin already mounted this process lifetime, so repeated
    /// enable/disable cycles keep the first mount.
    pub fn mount(&self, plugin: &str, table: RouteTable) -> bool {
        let mut mounted = self.mounted.write();
        if mounted.contains_key(plugin) {
            debug!(plugin, "routes already mounted, keeping existing mount");
            return false;
        }
        if table.routes.is_empty() {
            debug!(plugin, "plugin registered no routes");
        }
        mounted.insert(plugin.to_string(), table.routes);
        true
    }

    pub fn is_mounted(&self, plugin: &str) -> bool {
        self.mounted.read().contains_key(plugin)
    }

    /// Find the handler for a request against a plugin's mounted routes.
    pub fn resolve(&self, plugin: &str, method: &Method, path: &str) -> Option<ResolvedRoute> {
        let mounted = self.mounted.read();
        let routes = mounted.get(plugin)?;

        for entry in routes {
            if entry.method != method {
                continue;
            }
            if let Some(params) = match_path(&entry.path, path) {
                return Some(ResolvedRoute {
                    handler: Arc::clone(&entry.handler),
                    auth: entry.auth,
                    params,
                    pattern: entry.path.clone(),
                });
            }
        }
        None
    }

    /// All mounted routes, sorted by plugin then path.
    pub fn routes(&self) -> Vec<RouteInfo> {
        let mounted = self.mounted.read();
        let mut infos: Vec<RouteInfo> = mounted
            .iter()
            .flat_map(|(plugin, routes)| {
                routes.iter().map(|r| RouteInfo {
                    plugin: plugin.clone(),
                    method: r.method.to_string(),
                    path: r.path.clone(),
                    auth: r.auth,
                })
            })
            .collect();
        infos.sort_by(|a, b| (&a.plugin, &a.path, &a.method).cmp(&(&b.plugin, &b.path, &b.method)));
        infos
    }
}

/// Match a request path against a pattern with `{name}` segments.
fn match_path(pattern: &str, path: &str) -> Option<RouteParams> {
    let pattern_segs: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if pattern_segs.len() != path_segs.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (pat, seg) in pattern_segs.iter().zip(&path_segs) {
        if let Some(name) = pat.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            params.insert(name.to_string(), (*seg).to_string());
        } else if pat != seg {
            return None;
        }
    }
    Some(RouteParams(params))
}
