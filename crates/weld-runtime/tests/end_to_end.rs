//! End-to-end tests over real sockets: a bound server on an ephemeral
//! port, `tokio-tungstenite` as the WebSocket client, and raw TCP for
//! the HTTP exchanges.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use weld_core::{Gateway, ServerConfig};
use weld_framework::Router;
use weld_runtime::{QueueWriter, Server};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    }
}

/// Router with the handlers the scenarios need: echo, room join with an
/// acknowledgement, and a user route with a path parameter.
fn test_router() -> Router {
    let mut router = Router::new();
    router.on_event("echo", |ctx| async move {
        ctx.gateway
            .send(&ctx.client, "echo.reply", ctx.data.clone())
            .await?;
        Ok(())
    });
    router.on_event("join", |ctx| async move {
        let room = ctx.data["room"].as_str().unwrap_or("lobby").to_string();
        ctx.gateway.join_room(&ctx.client, &room);
        ctx.gateway
            .send(&ctx.client, "joined", json!({"room": room}))
            .await?;
        Ok(())
    });
    router
        .on_http("GET", "/users/{id}", |ctx| async move {
            Ok(json!({"id": ctx.request.params["id"]}))
        })
        .unwrap();
    router
}

async fn start(config: ServerConfig, router: Router) -> (SocketAddr, Gateway, CancellationToken) {
    let bound = Server::new(config, router).unwrap().bind().await.unwrap();
    let addr = bound.local_addr();
    let gateway = bound.gateway();
    let token = bound.shutdown_token();
    tokio::spawn(bound.serve());
    (addr, gateway, token)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/"))
        .await
        .expect("websocket connect failed");
    ws
}

/// Next text frame parsed as JSON, skipping control frames.
async fn next_event(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("frame is not JSON");
        }
    }
}

async fn send_event(ws: &mut WsClient, event: &str, data: Value) {
    let payload = json!({"event": event, "data": data}).to_string();
    ws.send(Message::Text(payload.into())).await.unwrap();
}

/// One raw HTTP exchange; returns the full response text.
async fn http_exchange(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut response))
        .await
        .expect("timed out reading response")
        .unwrap();
    String::from_utf8(response).unwrap()
}

async fn wait_until(mut probe: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !probe() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn handshake_accept_matches_rfc_example() {
    let (addr, _gateway, token) = start(test_config(), test_router()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();

    let mut buf = vec![0u8; 1024];
    let n = timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap();
    let response = String::from_utf8_lossy(&buf[..n]).to_string();
    assert!(response.contains("HTTP/1.1 101"));
    assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

    token.cancel();
}

#[tokio::test]
async fn echo_event_round_trips() {
    let (addr, _gateway, token) = start(test_config(), test_router()).await;
    let mut ws = connect(addr).await;

    send_event(&mut ws, "echo", json!({"x": 1})).await;
    let reply = next_event(&mut ws).await;
    assert_eq!(reply, json!({"event": "echo.reply", "data": {"x": 1}}));

    token.cancel();
}

#[tokio::test]
async fn room_broadcast_reaches_members_only() {
    let (addr, gateway, token) = start(test_config(), test_router()).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;

    send_event(&mut a, "join", json!({"room": "r"})).await;
    assert_eq!(next_event(&mut a).await["event"], "joined");
    send_event(&mut b, "join", json!({"room": "r"})).await;
    assert_eq!(next_event(&mut b).await["event"], "joined");

    gateway.broadcast("ping", json!({}), Some("/"), Some("r")).await;

    assert_eq!(next_event(&mut a).await["event"], "ping");
    assert_eq!(next_event(&mut b).await["event"], "ping");
    assert!(
        timeout(Duration::from_millis(300), c.next()).await.is_err(),
        "client outside the room received a frame"
    );

    token.cancel();
}

#[tokio::test]
async fn http_route_with_path_parameter() {
    let (addr, _gateway, token) = start(test_config(), test_router()).await;

    let response = http_exchange(addr, "GET /users/42 HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("Content-Type: application/json"));
    assert!(response.ends_with(r#"{"id":"42"}"#));

    token.cancel();
}

#[tokio::test]
async fn unmatched_route_is_404() {
    let (addr, _gateway, token) = start(test_config(), test_router()).await;
    let response = http_exchange(addr, "GET /nothing/here HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 404"));
    token.cancel();
}

#[tokio::test]
async fn preflight_carries_cors_headers() {
    let mut config = test_config();
    config.cors.allowed_origins = vec!["https://a.example".into()];
    let (addr, _gateway, token) = start(config, test_router()).await;

    let response = http_exchange(
        addr,
        "OPTIONS /anything HTTP/1.1\r\nHost: x\r\nOrigin: https://a.example\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 204"));
    assert!(response.contains("Access-Control-Allow-Origin: https://a.example"));
    assert!(response.contains("Access-Control-Allow-Methods:"));
    assert!(response.contains("Access-Control-Allow-Headers:"));
    assert!(response.contains("Access-Control-Max-Age: 86400"));

    token.cancel();
}

#[tokio::test]
async fn queue_broadcast_reaches_connected_clients() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("queue.jsonl");
    let mut config = test_config();
    config.queue_file = queue_path.to_string_lossy().into_owned();
    let (addr, _gateway, token) = start(config, test_router()).await;

    let mut ws = connect(addr).await;
    QueueWriter::new(queue_path.clone())
        .broadcast("news", json!({"t": 1}), None, None)
        .unwrap();

    let frame = next_event(&mut ws).await;
    assert_eq!(frame, json!({"event": "news", "data": {"t": 1}}));
    wait_until(|| std::fs::metadata(&queue_path).map(|m| m.len()).unwrap_or(0) == 0).await;

    token.cancel();
}

#[tokio::test]
async fn auth_key_is_enforced() {
    let mut config = test_config();
    config.auth_key = Some("s3cret".into());
    let (addr, _gateway, token) = start(config, test_router()).await;

    assert!(connect_async(format!("ws://{addr}/")).await.is_err());
    assert!(connect_async(format!("ws://{addr}/?key=wrong")).await.is_err());
    assert!(connect_async(format!("ws://{addr}/?key=s3cret")).await.is_ok());

    token.cancel();
}

#[tokio::test]
async fn disallowed_origin_is_refused() {
    let mut config = test_config();
    config.cors.allowed_origins = vec!["https://a.example".into()];
    let (addr, _gateway, token) = start(config, test_router()).await;

    let mut request = format!("ws://{addr}/").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://evil.example".parse().unwrap());
    assert!(connect_async(request).await.is_err());

    let mut request = format!("ws://{addr}/").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://a.example".parse().unwrap());
    assert!(connect_async(request).await.is_ok());

    token.cancel();
}

#[tokio::test]
async fn invalid_payload_gets_error_event_and_connection_survives() {
    let (addr, _gateway, token) = start(test_config(), test_router()).await;
    let mut ws = connect(addr).await;

    ws.send(Message::Text(r#"{"event":"bad name","data":{}}"#.into()))
        .await
        .unwrap();
    let error = next_event(&mut ws).await;
    assert_eq!(error["event"], "error");
    assert!(error["data"]["message"].is_string());
    assert!(error["data"]["timestamp"].is_u64());

    send_event(&mut ws, "echo", json!({"still": "alive"})).await;
    assert_eq!(next_event(&mut ws).await["event"], "echo.reply");

    token.cancel();
}

#[tokio::test]
async fn oversized_payload_is_rejected_with_error_event() {
    let mut config = test_config();
    config.max_message_size = 256;
    let (addr, _gateway, token) = start(config, test_router()).await;
    let mut ws = connect(addr).await;

    let big = "x".repeat(1024);
    send_event(&mut ws, "echo", json!({"big": big})).await;
    let error = next_event(&mut ws).await;
    assert_eq!(error["event"], "error");

    token.cancel();
}

#[tokio::test]
async fn disconnect_clears_every_index() {
    let (addr, gateway, token) = start(test_config(), test_router()).await;

    let mut ws = connect(addr).await;
    send_event(&mut ws, "join", json!({"room": "r"})).await;
    assert_eq!(next_event(&mut ws).await["event"], "joined");
    assert_eq!(gateway.clients_in_room("/", "r").len(), 1);
    let id = gateway.clients_in_room("/", "r")[0].clone();

    ws.close(None).await.unwrap();
    drop(ws);

    wait_until(|| gateway.is_fully_removed(&id)).await;
    assert_eq!(gateway.client_count(), 0);
    assert!(gateway.clients_in_room("/", "r").is_empty());

    token.cancel();
}

#[tokio::test]
async fn health_endpoint_reports_clients() {
    let mut config = test_config();
    config.health_check_path = Some("/healthz".into());
    let (addr, _gateway, token) = start(config, test_router()).await;

    let _ws = connect(addr).await;
    let response = http_exchange(addr, "GET /healthz HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let parsed: Value = serde_json::from_str(body).unwrap();
    assert_eq!(parsed["status"], "healthy");
    assert_eq!(parsed["server"]["clients"], 1);

    let post = http_exchange(addr, "POST /healthz HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(post.starts_with("HTTP/1.1 405"));

    token.cancel();
}

#[tokio::test]
async fn split_and_pipelined_frames_are_handled() {
    let (addr, _gateway, token) = start(test_config(), test_router()).await;
    let mut ws = connect(addr).await;

    // Two logical messages flushed back to back arrive in one read on
    // the server side often enough; both must dispatch, in order.
    send_event(&mut ws, "echo", json!({"n": 1})).await;
    send_event(&mut ws, "echo", json!({"n": 2})).await;
    assert_eq!(next_event(&mut ws).await["data"]["n"], 1);
    assert_eq!(next_event(&mut ws).await["data"]["n"], 2);

    token.cancel();
}

#[tokio::test]
async fn queue_emit_targets_one_client() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("queue.jsonl");
    let mut config = test_config();
    config.queue_file = queue_path.to_string_lossy().into_owned();
    let (addr, gateway, token) = start(config, test_router()).await;

    let mut a = connect(addr).await;
    send_event(&mut a, "join", json!({"room": "target"})).await;
    assert_eq!(next_event(&mut a).await["event"], "joined");
    let mut b = connect(addr).await;

    let target = gateway.clients_in_room("/", "target")[0].clone();
    QueueWriter::new(queue_path)
        .emit(target, "direct", json!({"for": "a"}))
        .unwrap();

    assert_eq!(next_event(&mut a).await["event"], "direct");
    assert!(
        timeout(Duration::from_millis(300), b.next()).await.is_err(),
        "untargeted client received the emit"
    );

    token.cancel();
}

#[tokio::test]
async fn json_request_body_reaches_handler_parsed() {
    let mut router = test_router();
    router
        .on_http("POST", "/mirror", |ctx| async move {
            match &ctx.request.body {
                weld_transport::Body::Json(value) => Ok(json!({"got": value})),
                other => anyhow::bail!("expected JSON body, got {other:?}"),
            }
        })
        .unwrap();
    let (addr, _gateway, token) = start(test_config(), router).await;

    let body = r#"{"k":"v"}"#;
    let request = format!(
        "POST /mirror HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let response = http_exchange(addr, &request).await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with(r#"{"got":{"k":"v"}}"#));

    token.cancel();
}

#[tokio::test]
async fn specials_fire_once_per_websocket_connection() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));

    let mut router = test_router();
    let c = connects.clone();
    router.on_connect(move |_ctx| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    let d = disconnects.clone();
    router.on_disconnect(move |_ctx| {
        let d = d.clone();
        async move {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    let (addr, _gateway, token) = start(test_config(), router).await;

    let mut ws = connect(addr).await;
    send_event(&mut ws, "echo", json!({})).await;
    assert_eq!(next_event(&mut ws).await["event"], "echo.reply");
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);

    ws.close(None).await.unwrap();
    drop(ws);
    wait_until(|| disconnects.load(Ordering::SeqCst) == 1).await;
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    // A plain HTTP exchange is not a WebSocket: no specials fire.
    let _ = http_exchange(addr, "GET /users/1 HTTP/1.1\r\nHost: x\r\n\r\n").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    token.cancel();
}

#[tokio::test]
async fn unknown_preamble_is_dropped_without_crashing() {
    let (addr, _gateway, token) = start(test_config(), test_router()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"\x16\x03\x01\x02\x00garbage").await.unwrap();
    let mut buf = Vec::new();
    let n = timeout(WAIT, stream.read_to_end(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0, "server should close without a response");

    // The listener is still alive.
    let response = http_exchange(addr, "GET /users/7 HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200"));

    token.cancel();
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let (addr, _gateway, token) = start(test_config(), test_router()).await;
    let mut ws = connect(addr).await;

    ws.send(Message::Ping(b"tick".to_vec().into())).await.unwrap();
    let message = timeout(WAIT, ws.next())
        .await
        .expect("timed out")
        .unwrap()
        .unwrap();
    match message {
        Message::Pong(payload) => assert_eq!(&payload[..], b"tick"),
        other => panic!("expected pong, got {other:?}"),
    }

    token.cancel();
}
