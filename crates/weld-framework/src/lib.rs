//! # Weld Framework
//!
//! Routing and middleware for the Weld socket framework.
//!
//! A [`Router`] holds three tables (WebSocket events, HTTP routes, and
//! the connect/disconnect special-event lists) and composes onion-style
//! middleware chains around every handler invocation:
//!
//! ```rust,ignore
//! use weld_framework::Router;
//!
//! let mut router = Router::new();
//! router.on_event("echo", |ctx| async move {
//!     ctx.gateway.send(&ctx.client, "echo.reply", ctx.data.clone()).await?;
//!     Ok(())
//! });
//! router.on_http("GET", "/users/{id}", |ctx| async move {
//!     Ok(serde_json::json!({"id": ctx.request.params["id"]}))
//! })?;
//! router.on_connect(|ctx| async move {
//!     ctx.gateway.join_room(&ctx.client, "lobby");
//!     Ok(())
//! });
//! ```

pub mod dispatch;
pub mod middleware;
pub mod middlewares;
pub mod router;

pub use dispatch::SpecialEvent;
pub use middlewares::{HttpLogger, WsLogger};
pub use middleware::{
    BoxFuture, HttpContext, HttpHandler, HttpMiddleware, HttpNext, WsContext, WsHandler,
    WsMiddleware, WsNext, http_handler, run_http_chain, run_ws_chain, ws_handler,
};
pub use router::{HttpRoute, Router, WsRoute};
