//! Connected-client model: identifiers, protocol kind, per-connection
//! handles, and the live client directory.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::error::{SendError, SendResult};
use crate::event::EventMessage;

/// Opaque client identifier, stable for the connection lifetime.
pub type ClientId = String;

static CLIENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocates a new client id: a prefixed unique token built from the
/// current time, a process-wide counter, and a random suffix. Never the
/// OS-level socket handle.
pub fn next_client_id() -> ClientId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let seq = CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let noise: u32 = rand::random();
    format!("c{millis:x}-{seq:x}-{noise:08x}")
}

/// The protocol a connection speaks. Starts `Unknown` and transitions to
/// `Http` or `Ws` exactly once, on the first non-empty inbound data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientKind {
    #[default]
    Unknown,
    Http,
    Ws,
}

/// What the per-connection writer task is asked to put on the wire.
///
/// The handle stays protocol-agnostic: frame encoding happens in the
/// transport layer, next to the socket.
#[derive(Debug)]
pub enum Outbound {
    /// An application event, serialized to a text frame by the writer.
    Event(EventMessage),
    /// A pong carrying the ping's payload.
    Pong(Vec<u8>),
    /// A close frame; the writer shuts the connection down afterwards.
    Close,
    /// Pre-serialized bytes (handshake and HTTP responses).
    Raw(Vec<u8>),
}

/// Handle to a single live connection.
///
/// Owned by the [`ClientDirectory`]; cloned via `Arc` wherever the
/// gateway or a handler needs to reach the client.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// The client id.
    pub id: ClientId,
    outbound: mpsc::Sender<Outbound>,
    shutdown: watch::Sender<bool>,
    kind: Mutex<ClientKind>,
    remote_addr: Mutex<String>,
    data: Mutex<HashMap<String, Value>>,
}

impl ConnectionHandle {
    /// Creates a handle for a freshly accepted connection.
    pub fn new(
        id: ClientId,
        outbound: mpsc::Sender<Outbound>,
        shutdown: watch::Sender<bool>,
        remote_addr: String,
    ) -> Self {
        Self {
            id,
            outbound,
            shutdown,
            kind: Mutex::new(ClientKind::Unknown),
            remote_addr: Mutex::new(remote_addr),
            data: Mutex::new(HashMap::new()),
        }
    }

    /// The connection's current protocol kind.
    pub fn kind(&self) -> ClientKind {
        *self.kind.lock()
    }

    /// Records the sniffed protocol. The `Unknown → Http|Ws` transition
    /// happens once; later calls are ignored.
    pub fn set_kind(&self, kind: ClientKind) {
        let mut guard = self.kind.lock();
        if *guard == ClientKind::Unknown {
            *guard = kind;
        }
    }

    /// The peer address, possibly rewritten from a trusted proxy header.
    pub fn remote_addr(&self) -> String {
        self.remote_addr.lock().clone()
    }

    /// Replaces the recorded peer address.
    pub fn set_remote_addr(&self, addr: String) {
        *self.remote_addr.lock() = addr;
    }

    /// Reads a value from the per-client scratch map.
    pub fn data(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    /// Writes a value into the per-client scratch map.
    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.data.lock().insert(key.into(), value);
    }

    /// Enqueues an outbound item for the writer task.
    pub async fn enqueue(&self, item: Outbound) -> SendResult<()> {
        self.outbound
            .send(item)
            .await
            .map_err(|_| SendError::Disconnected(self.id.clone()))
    }

    /// Signals the connection task to run its teardown path: disconnect
    /// special event (for WebSocket clients), index removal, socket close.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// The set of live connections, keyed by client id.
#[derive(Debug, Default)]
pub struct ClientDirectory {
    clients: RwLock<HashMap<ClientId, Arc<ConnectionHandle>>>,
}

impl ClientDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection.
    pub fn insert(&self, handle: Arc<ConnectionHandle>) {
        self.clients.write().insert(handle.id.clone(), handle);
    }

    /// Removes a connection, returning its handle if it was present.
    pub fn remove(&self, id: &str) -> Option<Arc<ConnectionHandle>> {
        self.clients.write().remove(id)
    }

    /// Looks up a connection.
    pub fn get(&self, id: &str) -> Option<Arc<ConnectionHandle>> {
        self.clients.read().get(id).cloned()
    }

    /// All live client ids.
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.read().keys().cloned().collect()
    }

    /// All live handles.
    pub fn handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.clients.read().values().cloned().collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handle(id: &str) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let (shutdown, _) = watch::channel(false);
        let handle = Arc::new(ConnectionHandle::new(
            id.to_string(),
            tx,
            shutdown,
            "127.0.0.1:1234".into(),
        ));
        (handle, rx)
    }

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = next_client_id();
        let b = next_client_id();
        assert_ne!(a, b);
        assert!(a.starts_with('c'));
    }

    #[test]
    fn kind_transitions_once() {
        let (handle, _rx) = test_handle("k");
        assert_eq!(handle.kind(), ClientKind::Unknown);
        handle.set_kind(ClientKind::Ws);
        handle.set_kind(ClientKind::Http);
        assert_eq!(handle.kind(), ClientKind::Ws);
    }

    #[test]
    fn directory_insert_remove() {
        let dir = ClientDirectory::new();
        let (handle, _rx) = test_handle("a");
        dir.insert(handle);
        assert_eq!(dir.len(), 1);
        assert!(dir.get("a").is_some());
        assert!(dir.remove("a").is_some());
        assert!(dir.is_empty());
        assert!(dir.remove("a").is_none());
    }

    #[tokio::test]
    async fn enqueue_fails_after_receiver_drop() {
        let (handle, rx) = test_handle("gone");
        drop(rx);
        let err = handle
            .enqueue(Outbound::Event(EventMessage::new(
                "x",
                serde_json::json!({}),
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Disconnected(_)));
    }

    #[test]
    fn scratch_data_round_trip() {
        let (handle, _rx) = test_handle("d");
        handle.set_data("user", serde_json::json!({"name": "ada"}));
        assert_eq!(handle.data("user").unwrap()["name"], "ada");
        assert!(handle.data("missing").is_none());
    }
}
