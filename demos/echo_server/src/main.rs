//! Weld Echo Server Example
//!
//! A small server demonstrating the framework surface: WebSocket events,
//! an HTTP route with a path parameter, connect/disconnect hooks, rooms,
//! and a logging middleware.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run --package echo_server
//! ```
//!
//! Then connect a WebSocket client to `ws://127.0.0.1:6001/` and send
//! `{"event":"echo","data":{"x":1}}`, or fetch
//! `http://127.0.0.1:6001/users/42`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;
use weld::prelude::*;

/// Logs every WebSocket dispatch, including the specials.
struct EventLogger;

#[async_trait]
impl WsMiddleware for EventLogger {
    fn name(&self) -> &str {
        "event-logger"
    }

    async fn handle(&self, ctx: WsContext, next: WsNext<'_>) -> Result<()> {
        info!(client = %ctx.client, event = %ctx.event, "dispatching");
        next.run(ctx).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::default().load()?;
    weld::logging::init(config.debug);

    let mut router = Router::new();
    router.add_ws_middleware(Arc::new(EventLogger));

    router.on_connect(|ctx| async move {
        info!(client = %ctx.client, "connected");
        ctx.gateway.join_room(&ctx.client, "lobby");
        Ok(())
    });
    router.on_disconnect(|ctx| async move {
        info!(client = %ctx.client, "disconnected");
        Ok(())
    });

    router.on_event("echo", |ctx| async move {
        ctx.gateway
            .send(&ctx.client, "echo.reply", ctx.data.clone())
            .await?;
        Ok(())
    });
    router.on_event("room.shout", |ctx| async move {
        ctx.gateway
            .broadcast("room.message", ctx.data.clone(), Some("/"), Some("lobby"))
            .await;
        Ok(())
    });

    router.on_http("GET", "/users/{id}", |ctx| async move {
        Ok(json!({"id": ctx.request.params["id"]}))
    })?;

    let server = Server::new(config, router)?;
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received, shutting down");
        shutdown.cancel();
    });

    server.run().await?;
    Ok(())
}
