//! Dispatch: composing the effective chain around a handler and
//! containing its faults.
//!
//! Handler and middleware errors never reach the listener loop. A failed
//! WebSocket dispatch answers the sender with an in-band error event; a
//! failed HTTP dispatch becomes a 500; special-event faults are logged
//! and the enumeration continues.

use serde_json::json;
use tracing::{debug, error};

use weld_core::{ClientId, EventMessage, Gateway, error_event};
use weld_transport::{HttpRequest, HttpResponse};

use crate::middleware::{HttpContext, WsContext, run_http_chain, run_ws_chain};
use crate::router::Router;

/// The two server-internal special events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialEvent {
    Connect,
    Disconnect,
}

impl SpecialEvent {
    fn name(self) -> &'static str {
        match self {
            Self::Connect => weld_core::CONNECT_EVENT,
            Self::Disconnect => weld_core::DISCONNECT_EVENT,
        }
    }
}

impl Router {
    /// Dispatches a decoded WebSocket event. Unroutable events are a
    /// no-op; handler faults are logged and answered with an error event.
    pub async fn dispatch_event(
        &self,
        gateway: &Gateway,
        client: &ClientId,
        message: EventMessage,
    ) {
        let Some(route) = self.ws_route(&message.event) else {
            debug!(client = %client, event = %message.event, "no route for event");
            return;
        };

        let chain = self.ws_chain(route);
        let ctx = WsContext {
            client: client.clone(),
            event: message.event.clone(),
            data: message.data,
            gateway: gateway.clone(),
        };

        if let Err(fault) = run_ws_chain(&chain, &route.handler, ctx).await {
            error!(client = %client, event = %message.event, error = %fault, "event handler failed");
            let _ = gateway
                .send_message(client, error_event(fault.to_string()))
                .await;
        }
    }

    /// Dispatches an HTTP request and produces the response body-to-be.
    /// The caller layers CORS headers on top.
    pub async fn dispatch_http(&self, gateway: &Gateway, mut request: HttpRequest) -> HttpResponse {
        let Some((route, params)) = self.match_http(&request.method, &request.path) else {
            debug!(method = %request.method, path = %request.path, "no route matched");
            return HttpResponse::not_found();
        };
        request.params = params;

        let method = request.method.clone();
        let path = request.path.clone();
        let chain = self.http_chain(route);
        let ctx = HttpContext {
            request,
            gateway: gateway.clone(),
        };

        match run_http_chain(&chain, &route.handler, ctx).await {
            Ok(reply) => reply.into_response(),
            Err(fault) => {
                error!(method = %method, path = %path, error = %fault, "HTTP handler failed");
                HttpResponse::internal_error()
            }
        }
    }

    /// Runs every registered handler for a special event through the
    /// global WebSocket middlewares with an empty payload. Per-handler
    /// faults are logged and never abort the enumeration.
    pub async fn dispatch_special(&self, gateway: &Gateway, client: &ClientId, which: SpecialEvent) {
        let handlers = match which {
            SpecialEvent::Connect => self.connect_handlers(),
            SpecialEvent::Disconnect => self.disconnect_handlers(),
        };

        for handler in handlers {
            let ctx = WsContext {
                client: client.clone(),
                event: which.name().to_string(),
                data: json!({}),
                gateway: gateway.clone(),
            };
            if let Err(fault) = run_ws_chain(self.ws_globals(), handler, ctx).await {
                error!(client = %client, event = which.name(), error = %fault, "special handler failed");
            }
        }
    }
}
