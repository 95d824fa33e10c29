//! The built-in health endpoint.
//!
//! When `health_check_path` is configured, GET and HEAD requests to that
//! path are answered before route dispatch.

use std::time::Duration;

use serde_json::json;

use weld_core::{Gateway, unix_timestamp};
use weld_transport::HttpResponse;

/// Builds the health report response.
pub fn health_response(gateway: &Gateway, head_only: bool) -> HttpResponse {
    let uptime = gateway.uptime();
    let body = json!({
        "status": "healthy",
        "timestamp": unix_timestamp(),
        "server": {
            "clients": gateway.client_count(),
            "uptime": uptime.as_secs(),
            "uptime_human": uptime_human(uptime),
        },
    });
    let mut response = HttpResponse::json(200, &body);
    if head_only {
        response.body.clear();
    }
    response
}

/// The 405 answer for non-GET/HEAD methods on the health path.
pub fn method_not_allowed() -> HttpResponse {
    HttpResponse::plain(405, "health endpoint accepts GET and HEAD only").with_header("Allow", "GET, HEAD")
}

/// Formats an uptime like `1d 2h 3m 4s`, omitting leading zero units.
pub fn uptime_human(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86400;
    let hours = (total % 86400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 || !parts.is_empty() {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || !parts.is_empty() {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{seconds}s"));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_uptime() {
        assert_eq!(uptime_human(Duration::from_secs(4)), "4s");
        assert_eq!(uptime_human(Duration::from_secs(64)), "1m 4s");
        assert_eq!(uptime_human(Duration::from_secs(3 * 3600 + 120)), "3h 2m 0s");
        assert_eq!(
            uptime_human(Duration::from_secs(90061)),
            "1d 1h 1m 1s"
        );
    }

    #[test]
    fn health_body_shape() {
        let gateway = Gateway::new();
        let response = health_response(&gateway, false);
        assert_eq!(response.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].is_u64());
        assert_eq!(body["server"]["clients"], 0);
        assert!(body["server"]["uptime_human"].is_string());
    }

    #[test]
    fn head_keeps_headers_drops_body() {
        let gateway = Gateway::new();
        let response = health_response(&gateway, true);
        assert!(response.body.is_empty());
        assert_eq!(response.header("Content-Type"), Some("application/json"));
    }
}
