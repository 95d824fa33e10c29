//! The per-connection driver.
//!
//! Each accepted socket gets one task running [`drive`]: register the
//! client, sniff the protocol on first data, then drive
//! either a single HTTP exchange or a full WebSocket session. A paired
//! writer task drains the client's outbound channel, so `send` and
//! `broadcast` stay safe from any handler while reads keep their wire
//! order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use weld_core::{
    ClientId, ClientKind, ConnectionHandle, EventMessage, Gateway, Outbound, ProtocolError,
    ServerConfig, error_event, next_client_id,
};
use weld_framework::{Router, SpecialEvent};
use weld_transport::http::{self, Cors, HttpRequest, HttpResponse};
use weld_transport::sniff::{self, Protocol};
use weld_transport::ws::{self, Handshake, OpCode, SessionEvent, WsSession};

/// Read size per cycle.
const READ_CHUNK: usize = 8 * 1024;

/// Upper bound on completing the WebSocket handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long teardown waits for the writer to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the connection currently is in its lifecycle.
enum Phase {
    /// Waiting for the first non-empty read.
    Sniffing,
    /// Accumulating an HTTP request.
    Http { buf: BytesMut },
    /// Accumulating a WebSocket upgrade request.
    Handshake { buf: BytesMut },
    /// Decoding frames.
    Frames { session: WsSession },
}

enum Step {
    Continue,
    Stop,
}

pub(crate) struct ConnectionDriver {
    id: ClientId,
    handle: Arc<ConnectionHandle>,
    gateway: Gateway,
    router: Arc<Router>,
    config: Arc<ServerConfig>,
    /// Set once the connect special event has run; gates every later
    /// dispatch and the single disconnect special on teardown.
    connect_fired: bool,
    handshake_deadline: Option<Instant>,
}

/// Registers the client and drives the connection to completion.
pub(crate) async fn drive(
    socket: TcpStream,
    peer: SocketAddr,
    gateway: Gateway,
    router: Arc<Router>,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
) {
    let id = next_client_id();
    let (outbound_tx, outbound_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = Arc::new(ConnectionHandle::new(
        id.clone(),
        outbound_tx,
        shutdown_tx,
        peer.to_string(),
    ));
    gateway.register(handle.clone());
    debug!(client = %id, peer = %peer, "connection accepted");

    let (read_half, write_half) = socket.into_split();
    let writer = tokio::spawn(write_loop(write_half, outbound_rx));

    let mut driver = ConnectionDriver {
        id: id.clone(),
        handle,
        gateway: gateway.clone(),
        router: router.clone(),
        config,
        connect_fired: false,
        handshake_deadline: None,
    };
    driver.read_loop(read_half, shutdown_rx, &cancel).await;
    let connect_fired = driver.connect_fired;
    drop(driver);

    // Teardown: indices first, then the disconnect special (exactly once,
    // after all in-flight dispatches have returned), then let the writer
    // drain whatever is still queued.
    let removed = gateway.unregister(&id);
    if connect_fired {
        router
            .dispatch_special(&gateway, &id, SpecialEvent::Disconnect)
            .await;
    }
    drop(removed);
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, writer).await;
    debug!(client = %id, "connection closed");
}

impl ConnectionDriver {
    async fn read_loop(
        &mut self,
        mut read_half: OwnedReadHalf,
        mut shutdown_rx: watch::Receiver<bool>,
        cancel: &CancellationToken,
    ) {
        let mut phase = Phase::Sniffing;
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            let deadline = self.handshake_deadline;
            tokio::select! {
                _ = cancel.cancelled() => {
                    if self.connect_fired {
                        let _ = self.handle.enqueue(Outbound::Close).await;
                    }
                    debug!(client = %self.id, "closing on server shutdown");
                    return;
                }
                _ = shutdown_rx.changed() => {
                    if self.connect_fired {
                        let _ = self.handle.enqueue(Outbound::Close).await;
                    }
                    debug!(client = %self.id, "closing on disconnect signal");
                    return;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(client = %self.id, "handshake timed out");
                    self.respond(HttpResponse::plain(408, "handshake timed out")).await;
                    return;
                }
                result = read_half.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            trace!(client = %self.id, "peer closed the connection");
                            return;
                        }
                        Err(e) => {
                            debug!(client = %self.id, error = %e, "read failed");
                            return;
                        }
                        Ok(n) => {
                            if let Step::Stop = self.on_data(&mut phase, &buf[..n]).await {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn on_data(&mut self, phase: &mut Phase, data: &[u8]) -> Step {
        match phase {
            Phase::Sniffing => match sniff::detect(data) {
                Ok(Protocol::Http) => {
                    self.handle.set_kind(ClientKind::Http);
                    let buf = BytesMut::from(data);
                    if http::request_complete(&buf) {
                        self.handle_http(&buf).await;
                        Step::Stop
                    } else {
                        *phase = Phase::Http { buf };
                        Step::Continue
                    }
                }
                Ok(Protocol::Ws) => {
                    self.handle.set_kind(ClientKind::Ws);
                    self.handshake_deadline = Some(Instant::now() + HANDSHAKE_TIMEOUT);
                    let buf = BytesMut::from(data);
                    if http::head_end(&buf).is_some() {
                        self.finish_handshake(phase, buf).await
                    } else {
                        *phase = Phase::Handshake { buf };
                        Step::Continue
                    }
                }
                Err(_) => {
                    warn!(client = %self.id, "unrecognized protocol, disconnecting");
                    Step::Stop
                }
            },
            Phase::Http { buf } => {
                buf.extend_from_slice(data);
                if http::request_complete(buf) {
                    let raw = std::mem::take(buf);
                    self.handle_http(&raw).await;
                    Step::Stop
                } else {
                    Step::Continue
                }
            }
            Phase::Handshake { buf } => {
                buf.extend_from_slice(data);
                if http::head_end(buf).is_some() {
                    let raw = std::mem::take(buf);
                    self.finish_handshake(phase, raw).await
                } else {
                    Step::Continue
                }
            }
            Phase::Frames { session } => self.on_frames(session, data).await,
        }
    }

    /// Parses and answers the single HTTP exchange, then closes.
    async fn handle_http(&mut self, raw: &[u8]) {
        let cors = Cors::new(self.config.cors.clone());
        let mut request = match HttpRequest::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(client = %self.id, error = %e, "malformed HTTP request");
                self.respond(HttpResponse::plain(400, "malformed request")).await;
                return;
            }
        };
        request.remote_addr = self.effective_remote_addr(&request);
        self.handle.set_remote_addr(request.remote_addr.clone());
        let origin = request.origin().map(str::to_string);
        info!(client = %self.id, method = %request.method, path = %request.path, "http request");

        let response = if request.method == "OPTIONS" {
            cors.preflight(origin.as_deref())
        } else if self.is_health_request(&request) {
            let mut response = if request.method == "GET" || request.method == "HEAD" {
                crate::health::health_response(&self.gateway, request.method == "HEAD")
            } else {
                crate::health::method_not_allowed()
            };
            cors.apply(&mut response, origin.as_deref());
            response
        } else {
            let mut response = self.router.dispatch_http(&self.gateway, request).await;
            cors.apply(&mut response, origin.as_deref());
            response
        };

        self.respond(response).await;
    }

    fn is_health_request(&self, request: &HttpRequest) -> bool {
        self.config
            .health_check_path
            .as_deref()
            .is_some_and(|path| path == request.path)
    }

    /// Validates the upgrade, answers it, and fires the connect special
    /// event before any frame is processed.
    async fn finish_handshake(&mut self, phase: &mut Phase, raw: BytesMut) -> Step {
        let Some(end) = http::head_end(&raw) else {
            return Step::Stop;
        };
        let request = match HttpRequest::parse(&raw[..end + 4]) {
            Ok(request) => request,
            Err(e) => {
                warn!(client = %self.id, error = %e, "malformed upgrade request");
                self.respond(HttpResponse::plain(400, "malformed request")).await;
                return Step::Stop;
            }
        };
        self.handle
            .set_remote_addr(self.effective_remote_addr(&request));

        match ws::negotiate(
            &request,
            &self.config.cors,
            self.config.auth_key.as_deref(),
        ) {
            Handshake::Rejected {
                status,
                reason,
                response,
            } => {
                warn!(client = %self.id, status, reason = %reason, "handshake rejected");
                let _ = self.handle.enqueue(Outbound::Raw(response)).await;
                Step::Stop
            }
            Handshake::Accepted { response } => {
                if self.handle.enqueue(Outbound::Raw(response)).await.is_err() {
                    return Step::Stop;
                }
                self.handshake_deadline = None;
                info!(client = %self.id, "websocket established");

                self.router
                    .dispatch_special(&self.gateway, &self.id, SpecialEvent::Connect)
                    .await;
                self.connect_fired = true;

                let mut session = WsSession::new(self.config.max_message_size);
                // The client may have pipelined frames behind the
                // handshake bytes.
                let leftover = &raw[end + 4..];
                let step = if leftover.is_empty() {
                    Step::Continue
                } else {
                    self.on_frames(&mut session, leftover).await
                };
                *phase = Phase::Frames { session };
                step
            }
        }
    }

    /// Feeds bytes to the session and acts on every decoded event, in
    /// wire order.
    async fn on_frames(&mut self, session: &mut WsSession, data: &[u8]) -> Step {
        let events = match session.ingest(data) {
            Ok(events) => events,
            Err(e) => {
                warn!(client = %self.id, error = %e, "websocket protocol error, disconnecting");
                if matches!(e, ProtocolError::MessageTooLarge { .. }) {
                    let _ = self
                        .gateway
                        .send_message(&self.id, error_event(e.to_string()))
                        .await;
                }
                let _ = self.handle.enqueue(Outbound::Close).await;
                return Step::Stop;
            }
        };

        for event in events {
            match event {
                SessionEvent::Message(payload) => match EventMessage::parse(&payload) {
                    Ok(message) => {
                        self.router
                            .dispatch_event(&self.gateway, &self.id, message)
                            .await;
                    }
                    Err(e) => {
                        debug!(client = %self.id, error = %e, "invalid event payload");
                        let _ = self
                            .gateway
                            .send_message(&self.id, error_event(e.to_string()))
                            .await;
                    }
                },
                SessionEvent::Ping(payload) => {
                    if self.handle.enqueue(Outbound::Pong(payload)).await.is_err() {
                        return Step::Stop;
                    }
                }
                SessionEvent::Pong => {
                    debug!(client = %self.id, "pong received");
                }
                SessionEvent::Close => {
                    debug!(client = %self.id, "close frame received");
                    let _ = self.handle.enqueue(Outbound::Close).await;
                    return Step::Stop;
                }
            }
        }
        Step::Continue
    }

    async fn respond(&self, response: HttpResponse) {
        let _ = self
            .handle
            .enqueue(Outbound::Raw(response.serialize()))
            .await;
    }

    /// The peer address, rewritten from `X-Forwarded-For` when the
    /// direct peer is a trusted proxy.
    fn effective_remote_addr(&self, request: &HttpRequest) -> String {
        let peer = self.handle.remote_addr();
        let peer_ip = peer
            .rsplit_once(':')
            .map(|(ip, _)| ip)
            .unwrap_or(peer.as_str())
            .trim_matches(|c| c == '[' || c == ']');
        if self.config.trusted_proxies.iter().any(|p| p == peer_ip) {
            if let Some(forwarded) = request.header("X-Forwarded-For") {
                if let Some(first) = forwarded.split(',').next() {
                    let first = first.trim();
                    if !first.is_empty() {
                        return first.to_string();
                    }
                }
            }
        }
        peer
    }
}

/// Drains the outbound channel onto the socket. Encoding happens here,
/// next to the wire; a failed write ends the task, which closes the
/// channel and lets the delivery paths disconnect the client.
async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(item) = rx.recv().await {
        let bytes = match item {
            Outbound::Event(message) => ws::encode(OpCode::Text, message.to_wire().as_bytes()),
            Outbound::Pong(payload) => ws::encode(OpCode::Pong, &payload),
            Outbound::Raw(bytes) => bytes,
            Outbound::Close => {
                let _ = write_half.write_all(&ws::encode_close()).await;
                break;
            }
        };
        if let Err(e) = write_half.write_all(&bytes).await {
            debug!(error = %e, "write failed, stopping writer");
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
