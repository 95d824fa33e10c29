//! The gateway: the cloneable server handle given to every handler,
//! middleware, and the queue poller.
//!
//! It owns the two shared indices (client directory, namespace/room
//! registry) and implements targeted delivery and fan-out on top of them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{ClientDirectory, ClientId, ClientKind, ConnectionHandle, Outbound};
use crate::error::{SendError, SendResult};
use crate::event::EventMessage;
use crate::registry::{DEFAULT_NAMESPACE, Registry};

/// Normalizes a namespace name to its canonical slash-prefixed form.
pub fn normalize_namespace(namespace: &str) -> String {
    if namespace.is_empty() {
        DEFAULT_NAMESPACE.to_string()
    } else if namespace.starts_with('/') {
        namespace.to_string()
    } else {
        format!("/{namespace}")
    }
}

struct GatewayInner {
    directory: ClientDirectory,
    registry: RwLock<Registry>,
    started_at: Instant,
}

/// Cloneable handle to the live server state.
///
/// Safe to call from any handler or task; index mutations happen under a
/// single coarse lock per index, never held across an await point.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Creates a gateway with empty indices.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                directory: ClientDirectory::new(),
                registry: RwLock::new(Registry::new()),
                started_at: Instant::now(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle (called by the connection driver)
    // -------------------------------------------------------------------------

    /// Registers a freshly accepted connection and joins it to the
    /// default namespace.
    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        let id = handle.id.clone();
        self.inner.directory.insert(handle);
        self.inner
            .registry
            .write()
            .join_namespace(&id, DEFAULT_NAMESPACE);
    }

    /// Removes a client from every index. Returns the handle if the
    /// client was still registered, so the caller can finish teardown.
    pub fn unregister(&self, client: &str) -> Option<Arc<ConnectionHandle>> {
        self.inner.registry.write().leave_namespace(client);
        self.inner.directory.remove(client)
    }

    /// Looks up a live connection handle.
    pub fn handle(&self, client: &str) -> Option<Arc<ConnectionHandle>> {
        self.inner.directory.get(client)
    }

    // -------------------------------------------------------------------------
    // Delivery
    // -------------------------------------------------------------------------

    /// Serializes `{event, data}` to a text frame and enqueues it for one
    /// client. A no-op unless the client exists and speaks WebSocket; a
    /// failed enqueue disconnects the client and reports the failure.
    pub async fn send(
        &self,
        client: &str,
        event: impl Into<String>,
        data: Value,
    ) -> SendResult<()> {
        let Some(handle) = self.inner.directory.get(client) else {
            debug!(client, "send to unknown client ignored");
            return Ok(());
        };
        if handle.kind() != ClientKind::Ws {
            debug!(client, "send to non-WebSocket client ignored");
            return Ok(());
        }
        let message = EventMessage::new(event, data);
        if handle.enqueue(Outbound::Event(message)).await.is_err() {
            warn!(client, "outbound channel closed, disconnecting");
            handle.close();
            return Err(SendError::Disconnected(client.to_string()));
        }
        Ok(())
    }

    /// Sends a pre-built message to one client (error events and other
    /// server-originated payloads).
    pub async fn send_message(&self, client: &str, message: EventMessage) -> SendResult<()> {
        self.send(client, message.event, message.data).await
    }

    /// Fan-out over the recipient filter: everyone, a namespace, or a
    /// room. Delivery happens in iteration order; clients whose channel
    /// failed are disconnected after the loop.
    pub async fn broadcast(
        &self,
        event: &str,
        data: Value,
        namespace: Option<&str>,
        room: Option<&str>,
    ) {
        let normalized = namespace.map(normalize_namespace);
        let recipients = {
            let registry = self.inner.registry.read();
            registry.recipients(normalized.as_deref(), room)
        };

        let mut failed: Vec<ClientId> = Vec::new();
        for client in recipients {
            let Some(handle) = self.inner.directory.get(&client) else {
                continue;
            };
            if handle.kind() != ClientKind::Ws {
                continue;
            }
            let message = EventMessage::new(event, data.clone());
            if handle.enqueue(Outbound::Event(message)).await.is_err() {
                failed.push(client);
            }
        }

        for client in failed {
            warn!(client = %client, "broadcast delivery failed, disconnecting");
            self.disconnect(&client);
        }
    }

    /// Signals a client's connection task to close the socket, remove it
    /// from all indices, and fire the disconnect special event if it was
    /// a WebSocket. Unknown clients are a no-op.
    pub fn disconnect(&self, client: &str) {
        if let Some(handle) = self.inner.directory.get(client) {
            handle.close();
        }
    }

    // -------------------------------------------------------------------------
    // Grouping
    // -------------------------------------------------------------------------

    /// Moves a client into a namespace (leaving its previous one).
    pub fn join_namespace(&self, client: &str, namespace: &str) {
        let namespace = normalize_namespace(namespace);
        self.inner.registry.write().join_namespace(client, &namespace);
    }

    /// Adds a client to a room within its current namespace.
    pub fn join_room(&self, client: &str, room: &str) {
        self.inner.registry.write().join_room(client, room);
    }

    /// Removes a client from a room.
    pub fn leave_room(&self, client: &str, room: &str) {
        self.inner.registry.write().leave_room(client, room);
    }

    /// Removes a client from every room it has joined.
    pub fn leave_all_rooms(&self, client: &str) {
        self.inner.registry.write().leave_all_rooms(client);
    }

    /// The namespace a client belongs to.
    pub fn client_namespace(&self, client: &str) -> Option<String> {
        self.inner
            .registry
            .read()
            .client_namespace(client)
            .map(str::to_string)
    }

    /// The rooms a client has joined, sorted.
    pub fn client_rooms(&self, client: &str) -> Vec<String> {
        self.inner.registry.read().client_rooms(client)
    }

    /// Room names that exist in a namespace, sorted.
    pub fn rooms(&self, namespace: &str) -> Vec<String> {
        self.inner.registry.read().rooms(&normalize_namespace(namespace))
    }

    /// Members of a namespace.
    pub fn clients_in_namespace(&self, namespace: &str) -> Vec<ClientId> {
        self.inner
            .registry
            .read()
            .clients_in_namespace(&normalize_namespace(namespace))
    }

    /// Members of a room.
    pub fn clients_in_room(&self, namespace: &str, room: &str) -> Vec<ClientId> {
        self.inner
            .registry
            .read()
            .clients_in_room(&normalize_namespace(namespace), room)
    }

    // -------------------------------------------------------------------------
    // Per-client scratch data and stats
    // -------------------------------------------------------------------------

    /// Reads from a client's scratch map.
    pub fn client_data(&self, client: &str, key: &str) -> Option<Value> {
        self.inner.directory.get(client).and_then(|h| h.data(key))
    }

    /// Writes into a client's scratch map.
    pub fn set_client_data(&self, client: &str, key: impl Into<String>, value: Value) {
        if let Some(handle) = self.inner.directory.get(client) {
            handle.set_data(key, value);
        }
    }

    /// Number of live connections.
    pub fn client_count(&self) -> usize {
        self.inner.directory.len()
    }

    /// Time since the gateway was created.
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Whether no index mentions the client. Teardown sanity check.
    pub fn is_fully_removed(&self, client: &str) -> bool {
        self.inner.directory.get(client).is_none()
            && !self.inner.registry.read().mentions(client)
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{mpsc, watch};

    fn ws_client(gateway: &Gateway, id: &str) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(8);
        let (shutdown, _) = watch::channel(false);
        let handle = Arc::new(ConnectionHandle::new(
            id.to_string(),
            tx,
            shutdown,
            "127.0.0.1:0".into(),
        ));
        handle.set_kind(ClientKind::Ws);
        gateway.register(handle);
        rx
    }

    #[tokio::test]
    async fn send_reaches_ws_client() {
        let gateway = Gateway::new();
        let mut rx = ws_client(&gateway, "a");
        gateway
            .send("a", "greet", serde_json::json!({"hi": true}))
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            Outbound::Event(msg) => assert_eq!(msg.event, "greet"),
            other => panic!("unexpected outbound item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_to_unknown_client_is_noop() {
        let gateway = Gateway::new();
        gateway.send("ghost", "e", serde_json::json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_respects_room_filter() {
        let gateway = Gateway::new();
        let mut rx_a = ws_client(&gateway, "a");
        let mut rx_b = ws_client(&gateway, "b");
        let mut rx_c = ws_client(&gateway, "c");
        gateway.join_room("a", "r");
        gateway.join_room("b", "r");

        gateway
            .broadcast("ping", serde_json::json!({}), Some("/"), Some("r"))
            .await;

        assert!(matches!(rx_a.try_recv(), Ok(Outbound::Event(_))));
        assert!(matches!(rx_b.try_recv(), Ok(Outbound::Event(_))));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_clears_all_indices() {
        let gateway = Gateway::new();
        let _rx = ws_client(&gateway, "a");
        gateway.join_room("a", "r");
        assert!(!gateway.is_fully_removed("a"));
        gateway.unregister("a");
        assert!(gateway.is_fully_removed("a"));
    }

    #[test]
    fn namespace_normalization() {
        assert_eq!(normalize_namespace(""), "/");
        assert_eq!(normalize_namespace("/chat"), "/chat");
        assert_eq!(normalize_namespace("chat"), "/chat");
    }
}
