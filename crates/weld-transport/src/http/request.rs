//! Minimal HTTP/1.1 request parsing.
//!
//! One request per connection: the driver accumulates reads until
//! [`request_complete`] says the head and body are all there, then parses
//! the whole buffer in one pass.

use std::collections::HashMap;

use serde_json::Value;
use url::form_urlencoded;
use weld_core::{ProtocolError, ProtocolResult};

/// A request body in the shape the handler wants it.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    /// Raw body that did not parse as JSON.
    Text(String),
    /// Body that parsed as JSON; the parsed form replaces the raw text.
    Json(Value),
}

/// A parsed HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method, uppercased as received.
    pub method: String,
    /// Path component, normalized to begin with `/`.
    pub path: String,
    /// Protocol token from the request line.
    pub protocol: String,
    /// Headers with lowercased names, values trimmed.
    pub headers: HashMap<String, String>,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
    /// Path parameters captured by route matching.
    pub params: HashMap<String, String>,
    /// Request body.
    pub body: Body,
    /// Peer address, possibly rewritten from a trusted proxy header.
    pub remote_addr: String,
}

impl HttpRequest {
    /// Parses a complete request buffer.
    pub fn parse(raw: &[u8]) -> ProtocolResult<Self> {
        let split = head_end(raw)
            .ok_or_else(|| ProtocolError::MalformedRequest("missing header terminator".into()))?;
        let head = std::str::from_utf8(&raw[..split])
            .map_err(|_| ProtocolError::MalformedRequest("header section is not UTF-8".into()))?;
        let body_bytes = &raw[split + 4..];

        let mut lines = head.split("\r\n");
        let request_line = lines
            .next()
            .ok_or_else(|| ProtocolError::MalformedRequest("empty request".into()))?;
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| ProtocolError::MalformedRequest("missing method".into()))?
            .to_string();
        let target = parts
            .next()
            .ok_or_else(|| ProtocolError::MalformedRequest("missing request target".into()))?;
        let protocol = parts.next().unwrap_or("HTTP/1.1").to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(ProtocolError::MalformedRequest(format!(
                    "bad header line '{line}'"
                )));
            };
            headers.insert(
                name.trim().to_ascii_lowercase(),
                value.trim().to_string(),
            );
        }

        let (path, query) = split_target(target);

        Ok(Self {
            method,
            path,
            protocol,
            headers,
            query,
            params: HashMap::new(),
            body: parse_body(body_bytes),
            remote_addr: String::new(),
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The `Origin` header, if present.
    pub fn origin(&self) -> Option<&str> {
        self.header("Origin")
    }
}

/// Whether a buffer holds a full request: the `\r\n\r\n` terminator plus
/// `Content-Length` bytes of body.
pub fn request_complete(buf: &[u8]) -> bool {
    let Some(split) = head_end(buf) else {
        return false;
    };
    let body_len = content_length(&buf[..split]).unwrap_or(0);
    buf.len() >= split + 4 + body_len
}

/// Position of the `\r\n\r\n` header terminator, if present. Bytes past
/// `head_end + 4` belong to the body, or, after an upgrade, to the
/// first WebSocket frames.
pub fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

fn content_length(head: &[u8]) -> Option<usize> {
    let head = String::from_utf8_lossy(head);
    for line in head.split("\r\n").skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

fn split_target(target: &str) -> (String, HashMap<String, String>) {
    let (raw_path, raw_query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };
    let path = if raw_path.starts_with('/') {
        raw_path.to_string()
    } else {
        format!("/{raw_path}")
    };
    let query = form_urlencoded::parse(raw_query.as_bytes())
        .into_owned()
        .collect();
    (path, query)
}

fn parse_body(bytes: &[u8]) -> Body {
    if bytes.is_empty() {
        return Body::Empty;
    }
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return Body::Json(value);
    }
    Body::Text(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_and_headers() {
        let req =
            HttpRequest::parse(b"GET /users?page=2&q=a+b HTTP/1.1\r\nHost: x\r\nX-K: v \r\n\r\n")
                .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/users");
        assert_eq!(req.protocol, "HTTP/1.1");
        assert_eq!(req.query["page"], "2");
        assert_eq!(req.query["q"], "a b");
        assert_eq!(req.header("x-k"), Some("v"));
        assert_eq!(req.header("X-K"), Some("v"));
        assert_eq!(req.body, Body::Empty);
    }

    #[test]
    fn json_body_replaces_raw_text() {
        let req = HttpRequest::parse(
            b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\n{\"a\":true}",
        )
        .unwrap();
        match &req.body {
            Body::Json(value) => assert_eq!(value["a"], true),
            other => panic!("expected JSON body, got {other:?}"),
        }
    }

    #[test]
    fn non_json_body_stays_text() {
        let req = HttpRequest::parse(b"POST /x HTTP/1.1\r\n\r\nplain words").unwrap();
        assert_eq!(req.body, Body::Text("plain words".into()));
    }

    #[test]
    fn path_normalized_to_leading_slash() {
        let req = HttpRequest::parse(b"GET x HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.path, "/x");
    }

    #[test]
    fn empty_query_is_no_parameters() {
        let req = HttpRequest::parse(b"GET /p? HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.query.is_empty());
    }

    #[test]
    fn missing_terminator_is_malformed() {
        assert!(HttpRequest::parse(b"GET / HTTP/1.1\r\nHost: x").is_err());
    }

    #[test]
    fn completeness_honors_content_length() {
        let head = b"POST / HTTP/1.1\r\ncontent-length: 5\r\n\r\n";
        assert!(!request_complete(head));
        let mut full = head.to_vec();
        full.extend_from_slice(b"12345");
        assert!(request_complete(&full));
        assert!(request_complete(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(!request_complete(b"GET / HTTP/1.1\r\n"));
    }
}
