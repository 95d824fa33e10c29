//! Built-in logging middleware.
//!
//! Logs every dispatch with its outcome and latency. Register it first
//! so it wraps the whole chain; routes that want silence exclude it by
//! name (`"logger"`).

use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use weld_transport::Reply;

use crate::middleware::{HttpContext, HttpMiddleware, HttpNext, WsContext, WsMiddleware, WsNext};

/// Logs WebSocket event and special-event dispatches.
#[derive(Debug, Default)]
pub struct WsLogger;

impl WsLogger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WsMiddleware for WsLogger {
    fn name(&self) -> &str {
        "logger"
    }

    async fn handle(&self, ctx: WsContext, next: WsNext<'_>) -> anyhow::Result<()> {
        let client = ctx.client.clone();
        let event = ctx.event.clone();
        let start = Instant::now();
        let result = next.run(ctx).await;
        match &result {
            Ok(()) => info!(client = %client, event = %event, took = ?start.elapsed(), "event handled"),
            Err(e) => warn!(client = %client, event = %event, error = %e, "event failed"),
        }
        result
    }
}

/// Logs HTTP dispatches.
#[derive(Debug, Default)]
pub struct HttpLogger;

impl HttpLogger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HttpMiddleware for HttpLogger {
    fn name(&self) -> &str {
        "logger"
    }

    async fn handle(&self, ctx: HttpContext, next: HttpNext<'_>) -> anyhow::Result<Reply> {
        let method = ctx.request.method.clone();
        let path = ctx.request.path.clone();
        let start = Instant::now();
        let result = next.run(ctx).await;
        match &result {
            Ok(_) => info!(method = %method, path = %path, took = ?start.elapsed(), "request handled"),
            Err(e) => warn!(method = %method, path = %path, error = %e, "request failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use weld_core::Gateway;

    use crate::middleware::{run_ws_chain, ws_handler};

    #[tokio::test]
    async fn logger_passes_results_through() {
        let chain: Vec<Arc<dyn WsMiddleware>> = vec![Arc::new(WsLogger::new())];
        let handler = ws_handler(|_ctx| async move { Ok(()) });
        let ctx = WsContext {
            client: "c1".into(),
            event: "e".into(),
            data: json!({}),
            gateway: Gateway::new(),
        };
        run_ws_chain(&chain, &handler, ctx.clone()).await.unwrap();

        let failing = ws_handler(|_ctx| async move { anyhow::bail!("nope") });
        assert!(run_ws_chain(&chain, &failing, ctx).await.is_err());
    }
}
