//! # Weld
//!
//! A dual-protocol socket framework: a single TCP listener that sniffs
//! each connection, speaks RFC 6455 WebSocket or minimal HTTP/1.1, and
//! dispatches decoded events and requests through an onion middleware
//! router into user handlers. Clients group into namespaces and rooms
//! for targeted broadcast; a file-backed queue lets other processes
//! inject messages.
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌── WS engine ───┐   ┌────────────────┐
//! │ listener │──▶│ sniffer │──▶│                │──▶│ router + mw    │
//! └──────────┘   └─────────┘   └── HTTP engine ─┘   └───────┬────────┘
//!      ▲                                                    ▼
//! [queue poller]                              [namespace/room registry]
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use weld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::default().load()?;
//!     weld::logging::init(config.debug);
//!
//!     let mut router = Router::new();
//!     router.on_event("echo", |ctx| async move {
//!         ctx.gateway.send(&ctx.client, "echo.reply", ctx.data.clone()).await?;
//!         Ok(())
//!     });
//!     router.on_http("GET", "/users/{id}", |ctx| async move {
//!         Ok(serde_json::json!({"id": ctx.request.params["id"]}))
//!     })?;
//!
//!     Server::new(config, router)?.run().await?;
//!     Ok(())
//! }
//! ```

// Core types
pub use weld_core::*;

// Wire layer
pub use weld_transport;

// Router and middleware
pub use weld_framework;

// Runtime
pub use weld_runtime;
pub use weld_runtime::logging;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use weld_core::{ClientId, EventMessage, Gateway, ServerConfig};
    pub use weld_framework::{
        HttpContext, HttpMiddleware, HttpNext, Router, WsContext, WsMiddleware, WsNext,
    };
    pub use weld_runtime::{ConfigLoader, QueueWriter, Server};
    pub use weld_transport::{HttpResponse, Reply};
}
