//! HTTP/1.1 response construction and serialization.
//!
//! The response stream is write-once per connection; serialization adds
//! `Content-Length` and `Connection: close` so the peer knows the
//! exchange is over.

use serde_json::{Value, json};

/// A buildable HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header pairs in emission order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// An empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// A JSON-encoded response.
    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(serde_json::to_vec(value).unwrap_or_default())
    }

    /// An HTML response, the shape a plain string handler result takes.
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    /// A plain-text response, used for protocol-level failures.
    pub fn plain(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    /// The 404 answer for unmatched routes and `None` handler results.
    pub fn not_found() -> Self {
        Self::json(404, &json!({"error": "Not Found"}))
    }

    /// The 500 answer for handler faults.
    pub fn internal_error() -> Self {
        Self::json(500, &json!({"error": "Internal Server Error"}))
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replaces a header if present, appends otherwise.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        for (existing, existing_value) in &mut self.headers {
            if existing.eq_ignore_ascii_case(name) {
                *existing_value = value.into();
                return;
            }
        }
        self.headers.push((name.to_string(), value.into()));
    }

    /// First value of a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Serializes to wire form: status line, headers, blank line, body.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status,
            reason_phrase(self.status)
        )
        .into_bytes();
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(b"Connection: close\r\n\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// What an HTTP handler hands back; the engine turns it into a response.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Becomes the body of a `200` `text/html` response.
    Text(String),
    /// JSON-encoded into a `200` `application/json` response.
    Json(Value),
    /// Emitted verbatim.
    Response(HttpResponse),
    /// Becomes a 404.
    None,
}

impl Reply {
    /// Applies the handler-result mapping.
    pub fn into_response(self) -> HttpResponse {
        match self {
            Reply::Text(body) => HttpResponse::html(200, body),
            Reply::Json(value) => HttpResponse::json(200, &value),
            Reply::Response(response) => response,
            Reply::None => HttpResponse::not_found(),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Json(value)
    }
}

impl From<String> for Reply {
    fn from(body: String) -> Self {
        Reply::Text(body)
    }
}

impl From<&str> for Reply {
    fn from(body: &str) -> Self {
        Reply::Text(body.to_string())
    }
}

impl From<HttpResponse> for Reply {
    fn from(response: HttpResponse) -> Self {
        Reply::Response(response)
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_valid_http() {
        let raw = HttpResponse::html(200, "<p>hi</p>").serialize();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.contains("\r\n\r\n<p>hi</p>"));
    }

    #[test]
    fn reply_mapping() {
        assert_eq!(Reply::from("x").into_response().status, 200);
        assert_eq!(
            Reply::from("x").into_response().header("Content-Type"),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(
            Reply::Json(json!({"a": 1})).into_response().header("Content-Type"),
            Some("application/json")
        );
        assert_eq!(Reply::None.into_response().status, 404);

        let custom = HttpResponse::plain(418, "teapot");
        assert_eq!(Reply::Response(custom.clone()).into_response(), custom);
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut response = HttpResponse::new(200).with_header("X-One", "a");
        response.set_header("x-one", "b");
        assert_eq!(response.header("X-One"), Some("b"));
        assert_eq!(response.headers.len(), 1);
    }
}
