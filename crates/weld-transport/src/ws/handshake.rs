//! The RFC 6455 upgrade handshake, server side.
//!
//! Exactly one exchange per connection. Checks run in order: origin
//! allow-list, auth key, upgrade headers; the outcome is a structured
//! value carrying the exact response bytes to write, never an exception.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use weld_core::CorsConfig;

use crate::http::{HttpRequest, HttpResponse};

/// Fixed GUID appended to the client key when computing the accept token.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Result of negotiating an upgrade request.
#[derive(Debug, Clone, PartialEq)]
pub enum Handshake {
    /// The upgrade is accepted; write `response` and enter frame mode.
    Accepted { response: Vec<u8> },
    /// The upgrade is refused; write `response` and close.
    Rejected {
        status: u16,
        reason: String,
        response: Vec<u8>,
    },
}

impl Handshake {
    fn rejected(status: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::Rejected {
            status,
            response: HttpResponse::plain(status, reason.clone()).serialize(),
            reason,
        }
    }
}

/// Computes `base64(SHA-1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64.encode(sha1.finalize())
}

/// Validates an upgrade request and builds the `101` response.
pub fn negotiate(
    request: &HttpRequest,
    cors: &CorsConfig,
    auth_key: Option<&str>,
) -> Handshake {
    let origin = request.origin();
    if !cors.origin_allowed(origin) {
        return Handshake::rejected(403, "origin not allowed");
    }

    if let Some(expected) = auth_key {
        match request.query.get("key") {
            Some(presented) if presented == expected => {}
            _ => return Handshake::rejected(401, "missing or invalid auth key"),
        }
    }

    let Some(key) = request.header("Sec-WebSocket-Key") else {
        return Handshake::rejected(400, "missing Sec-WebSocket-Key");
    };

    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         Sec-WebSocket-Version: 13\r\n",
        accept_key(key)
    );
    if let Some(origin) = origin {
        response.push_str(&format!("Access-Control-Allow-Origin: {origin}\r\n"));
    }
    response.push_str("\r\n");

    Handshake::Accepted {
        response: response.into_bytes(),
    }
}
