//! Protocol sniffing on the first inbound bytes of a connection.
//!
//! Everything Weld accepts starts HTTP-shaped: a method token followed by
//! a space. A request carrying the literal `Upgrade: websocket` header is
//! routed to the WebSocket engine; any other HTTP request goes to the
//! HTTP engine; anything else is rejected.

use weld_core::{ProtocolError, ProtocolResult};

/// The protocol selected for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Ws,
}

const METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "OPTIONS", "PATCH", "HEAD"];

/// The upgrade marker is matched case-sensitively against the raw bytes,
/// before any header parsing happens.
const UPGRADE_MARKER: &[u8] = b"Upgrade: websocket";

/// Classifies the first non-empty read of a connection.
pub fn detect(first: &[u8]) -> ProtocolResult<Protocol> {
    let http_shaped = METHODS.iter().any(|method| {
        first.len() > method.len()
            && first.starts_with(method.as_bytes())
            && first[method.len()] == b' '
    });
    if !http_shaped {
        return Err(ProtocolError::UnknownProtocol);
    }

    if contains(first, UPGRADE_MARKER) {
        Ok(Protocol::Ws)
    } else {
        Ok(Protocol::Http)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}
