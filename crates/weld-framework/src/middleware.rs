//! Onion-style middleware.
//!
//! A middleware receives the call context plus a [`WsNext`]/[`HttpNext`]
//! continuation; calling `next.run(ctx)` invokes the remainder of the
//! chain and returns its result, not calling it short-circuits. The
//! effective chain for a call is
//! the globals minus the route's exclusions, then the route's own
//! middlewares, with the handler innermost.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use weld_core::{ClientId, Gateway};
use weld_transport::{HttpRequest, Reply};

/// Boxed future used by handler signatures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Context of a WebSocket event dispatch.
#[derive(Clone)]
pub struct WsContext {
    /// The sending client.
    pub client: ClientId,
    /// The event name.
    pub event: String,
    /// The event payload (always a JSON object).
    pub data: Value,
    /// Server handle for sends, broadcasts, and grouping.
    pub gateway: Gateway,
}

/// Context of an HTTP dispatch.
#[derive(Clone)]
pub struct HttpContext {
    /// The parsed request, `params` filled by route matching.
    pub request: HttpRequest,
    /// Server handle.
    pub gateway: Gateway,
}

/// Innermost WebSocket callable.
pub type WsHandler = Arc<dyn Fn(WsContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Innermost HTTP callable.
pub type HttpHandler =
    Arc<dyn Fn(HttpContext) -> BoxFuture<'static, anyhow::Result<Reply>> + Send + Sync>;

/// Wraps an async closure into a [`WsHandler`].
pub fn ws_handler<F, Fut>(f: F) -> WsHandler
where
    F: Fn(WsContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f(ctx)) })
}

/// Wraps an async closure into an [`HttpHandler`].
pub fn http_handler<F, Fut, R>(f: F) -> HttpHandler
where
    F: Fn(HttpContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Into<Reply>,
{
    Arc::new(move |ctx| -> BoxFuture<'static, anyhow::Result<Reply>> {
        let fut = f(ctx);
        Box::pin(async move { fut.await.map(Into::into) })
    })
}

/// Interceptor around WebSocket event and special-event handlers.
#[async_trait]
pub trait WsMiddleware: Send + Sync {
    /// Name used by per-route exclusion sets.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, ctx: WsContext, next: WsNext<'_>) -> anyhow::Result<()>;
}

/// Interceptor around HTTP handlers.
#[async_trait]
pub trait HttpMiddleware: Send + Sync {
    /// Name used by per-route exclusion sets.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, ctx: HttpContext, next: HttpNext<'_>) -> anyhow::Result<Reply>;
}

/// Continuation into the remainder of a WebSocket chain.
pub struct WsNext<'a> {
    chain: &'a [Arc<dyn WsMiddleware>],
    handler: &'a WsHandler,
    index: usize,
}

impl<'a> WsNext<'a> {
    /// Invokes the rest of the chain, the handler innermost.
    pub async fn run(self, ctx: WsContext) -> anyhow::Result<()> {
        match self.chain.get(self.index) {
            Some(middleware) => {
                let next = WsNext {
                    chain: self.chain,
                    handler: self.handler,
                    index: self.index + 1,
                };
                middleware.handle(ctx, next).await
            }
            None => (self.handler)(ctx).await,
        }
    }
}

/// Continuation into the remainder of an HTTP chain.
pub struct HttpNext<'a> {
    chain: &'a [Arc<dyn HttpMiddleware>],
    handler: &'a HttpHandler,
    index: usize,
}

impl<'a> HttpNext<'a> {
    /// Invokes the rest of the chain, the handler innermost.
    pub async fn run(self, ctx: HttpContext) -> anyhow::Result<Reply> {
        match self.chain.get(self.index) {
            Some(middleware) => {
                let next = HttpNext {
                    chain: self.chain,
                    handler: self.handler,
                    index: self.index + 1,
                };
                middleware.handle(ctx, next).await
            }
            None => (self.handler)(ctx).await,
        }
    }
}

/// Runs a composed WebSocket chain.
pub async fn run_ws_chain(
    chain: &[Arc<dyn WsMiddleware>],
    handler: &WsHandler,
    ctx: WsContext,
) -> anyhow::Result<()> {
    WsNext {
        chain,
        handler,
        index: 0,
    }
    .run(ctx)
    .await
}

/// Runs a composed HTTP chain.
pub async fn run_http_chain(
    chain: &[Arc<dyn HttpMiddleware>],
    handler: &HttpHandler,
    ctx: HttpContext,
) -> anyhow::Result<Reply> {
    HttpNext {
        chain,
        handler,
        index: 0,
    }
    .run(ctx)
    .await
}
