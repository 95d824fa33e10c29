//! Route tables and registration.
//!
//! Three tables: WebSocket events by name, HTTP routes by method and path
//! pattern, and the ordered connect/disconnect handler lists. Route keys
//! overwrite on re-registration; special-event handlers append.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use regex::Regex;

use weld_core::{SetupError, SetupResult};
use weld_transport::Reply;

use crate::middleware::{
    HttpContext, HttpHandler, HttpMiddleware, WsContext, WsHandler, WsMiddleware, http_handler,
    ws_handler,
};

/// A registered WebSocket event route.
pub struct WsRoute {
    pub handler: WsHandler,
    /// Per-route middlewares, appended after the surviving globals.
    pub middlewares: Vec<Arc<dyn WsMiddleware>>,
    /// Names of global middlewares to skip for this route.
    pub excluded: HashSet<String>,
}

/// A registered HTTP route.
pub struct HttpRoute {
    pub method: String,
    pub pattern: String,
    /// Compiled form of a `{name}` pattern; `None` for literal paths.
    regex: Option<Regex>,
    pub handler: HttpHandler,
    pub middlewares: Vec<Arc<dyn HttpMiddleware>>,
    pub excluded: HashSet<String>,
}

/// Registration surface and lookup tables.
#[derive(Default)]
pub struct Router {
    ws_routes: HashMap<String, WsRoute>,
    /// HTTP routes in registration order (pattern matching is ordered).
    http_routes: Vec<HttpRoute>,
    /// "METHOD pattern" → index into `http_routes`, for exact matches and
    /// overwrite-on-re-registration.
    http_index: HashMap<String, usize>,
    connect: Vec<WsHandler>,
    disconnect: Vec<WsHandler>,
    ws_globals: Vec<Arc<dyn WsMiddleware>>,
    http_globals: Vec<Arc<dyn HttpMiddleware>>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Registers a WebSocket event handler.
    pub fn on_event<F, Fut>(&mut self, event: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(WsContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_ws_route(event, ws_handler(f), Vec::new(), Vec::<String>::new());
        self
    }

    /// Registers a WebSocket event handler with per-route middlewares and
    /// global exclusions.
    pub fn on_event_with<F, Fut, S>(
        &mut self,
        event: impl Into<String>,
        f: F,
        middlewares: Vec<Arc<dyn WsMiddleware>>,
        excluded: impl IntoIterator<Item = S>,
    ) -> &mut Self
    where
        F: Fn(WsContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
        S: Into<String>,
    {
        self.add_ws_route(event, ws_handler(f), middlewares, excluded);
        self
    }

    fn add_ws_route<S: Into<String>>(
        &mut self,
        event: impl Into<String>,
        handler: WsHandler,
        middlewares: Vec<Arc<dyn WsMiddleware>>,
        excluded: impl IntoIterator<Item = S>,
    ) {
        self.ws_routes.insert(
            event.into(),
            WsRoute {
                handler,
                middlewares,
                excluded: excluded.into_iter().map(Into::into).collect(),
            },
        );
    }

    /// Registers an HTTP route. The path may contain `{name}`
    /// placeholders; a bad pattern is a fatal setup error.
    pub fn on_http<F, Fut, R>(
        &mut self,
        method: impl Into<String>,
        pattern: impl Into<String>,
        f: F,
    ) -> SetupResult<&mut Self>
    where
        F: Fn(HttpContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply>,
    {
        self.add_http_route(method, pattern, http_handler(f), Vec::new(), Vec::<String>::new())?;
        Ok(self)
    }

    /// Registers an HTTP route with per-route middlewares and global
    /// exclusions.
    pub fn on_http_with<F, Fut, R, S>(
        &mut self,
        method: impl Into<String>,
        pattern: impl Into<String>,
        f: F,
        middlewares: Vec<Arc<dyn HttpMiddleware>>,
        excluded: impl IntoIterator<Item = S>,
    ) -> SetupResult<&mut Self>
    where
        F: Fn(HttpContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply>,
        S: Into<String>,
    {
        self.add_http_route(method, pattern, http_handler(f), middlewares, excluded)?;
        Ok(self)
    }

    fn add_http_route<S: Into<String>>(
        &mut self,
        method: impl Into<String>,
        pattern: impl Into<String>,
        handler: HttpHandler,
        middlewares: Vec<Arc<dyn HttpMiddleware>>,
        excluded: impl IntoIterator<Item = S>,
    ) -> SetupResult<()> {
        let method = method.into().to_ascii_uppercase();
        let pattern = pattern.into();
        let route = HttpRoute {
            regex: compile_pattern(&pattern)?,
            method: method.clone(),
            pattern: pattern.clone(),
            handler,
            middlewares,
            excluded: excluded.into_iter().map(Into::into).collect(),
        };

        let key = format!("{method} {pattern}");
        if let Some(&index) = self.http_index.get(&key) {
            self.http_routes[index] = route;
        } else {
            self.http_index.insert(key, self.http_routes.len());
            self.http_routes.push(route);
        }
        Ok(())
    }

    /// Appends a connect special-event handler.
    pub fn on_connect<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(WsContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.connect.push(ws_handler(f));
        self
    }

    /// Appends a disconnect special-event handler.
    pub fn on_disconnect<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(WsContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.disconnect.push(ws_handler(f));
        self
    }

    /// Appends a global WebSocket middleware. Globals wrap every event
    /// and special-event dispatch unless a route excludes them by name.
    pub fn add_ws_middleware(&mut self, middleware: Arc<dyn WsMiddleware>) -> &mut Self {
        self.ws_globals.push(middleware);
        self
    }

    /// Appends a global HTTP middleware.
    pub fn add_http_middleware(&mut self, middleware: Arc<dyn HttpMiddleware>) -> &mut Self {
        self.http_globals.push(middleware);
        self
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Looks up a WebSocket route by event name.
    pub fn ws_route(&self, event: &str) -> Option<&WsRoute> {
        self.ws_routes.get(event)
    }

    /// Matches an HTTP request: the exact "METHOD PATH" entry wins,
    /// otherwise the first pattern route (registration order) whose regex
    /// matches. Captures become path parameters.
    pub fn match_http(
        &self,
        method: &str,
        path: &str,
    ) -> Option<(&HttpRoute, HashMap<String, String>)> {
        if let Some(&index) = self.http_index.get(&format!("{method} {path}")) {
            return Some((&self.http_routes[index], HashMap::new()));
        }

        for route in &self.http_routes {
            if route.method != method {
                continue;
            }
            let Some(regex) = &route.regex else { continue };
            if let Some(captures) = regex.captures(path) {
                let params = regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        captures
                            .name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                return Some((route, params));
            }
        }
        None
    }

    /// The effective middleware chain for a WebSocket route.
    pub fn ws_chain(&self, route: &WsRoute) -> Vec<Arc<dyn WsMiddleware>> {
        let mut chain: Vec<Arc<dyn WsMiddleware>> = self
            .ws_globals
            .iter()
            .filter(|mw| !route.excluded.contains(mw.name()))
            .cloned()
            .collect();
        chain.extend(route.middlewares.iter().cloned());
        chain
    }

    /// The effective middleware chain for an HTTP route.
    pub fn http_chain(&self, route: &HttpRoute) -> Vec<Arc<dyn HttpMiddleware>> {
        let mut chain: Vec<Arc<dyn HttpMiddleware>> = self
            .http_globals
            .iter()
            .filter(|mw| !route.excluded.contains(mw.name()))
            .cloned()
            .collect();
        chain.extend(route.middlewares.iter().cloned());
        chain
    }

    /// The global WebSocket middlewares (special events run through these).
    pub fn ws_globals(&self) -> &[Arc<dyn WsMiddleware>] {
        &self.ws_globals
    }

    /// Registered connect handlers, in registration order.
    pub fn connect_handlers(&self) -> &[WsHandler] {
        &self.connect
    }

    /// Registered disconnect handlers, in registration order.
    pub fn disconnect_handlers(&self) -> &[WsHandler] {
        &self.disconnect
    }
}

/// Compiles a `{name}` pattern into an anchored regex with named
/// captures; literal patterns compile to `None`.
fn compile_pattern(pattern: &str) -> SetupResult<Option<Regex>> {
    if !pattern.contains('{') {
        return Ok(None);
    }

    let mut source = String::from("^");
    let mut rest = pattern;
    while let Some(start) = rest.find('{') {
        let (literal, tail) = rest.split_at(start);
        source.push_str(&regex::escape(literal));
        let Some(end) = tail.find('}') else {
            return Err(SetupError::InvalidRoutePattern {
                pattern: pattern.to_string(),
                reason: "unterminated '{'".to_string(),
            });
        };
        let name = &tail[1..end];
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.chars().next().is_some_and(|c| c.is_ascii_digit());
        if !valid {
            return Err(SetupError::InvalidRoutePattern {
                pattern: pattern.to_string(),
                reason: format!("invalid parameter name '{name}'"),
            });
        }
        source.push_str(&format!("(?P<{name}>[^/]+)"));
        rest = &tail[end + 1..];
    }
    source.push_str(&regex::escape(rest));
    source.push('$');

    Regex::new(&source)
        .map(Some)
        .map_err(|e| SetupError::InvalidRoutePattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}
