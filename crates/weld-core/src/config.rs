//! Typed server configuration.
//!
//! Plain serde structs with explicit defaults; no ambient globals. The
//! runtime crate layers file and environment sources on top of these
//! types.

use serde::{Deserialize, Serialize};

/// Root server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Raises the default log level to debug.
    pub debug: bool,

    /// Maximum accepted WebSocket message size in bytes. Applies to the
    /// assembled logical message and to the undecoded residual buffer.
    pub max_message_size: usize,

    /// When set, WebSocket handshakes must carry this value as the `key`
    /// query parameter.
    pub auth_key: Option<String>,

    /// Path of the newline-delimited JSON queue file polled for
    /// cross-process messages.
    pub queue_file: String,

    /// When set, GET/HEAD requests to this path answer a health report
    /// before route dispatch.
    pub health_check_path: Option<String>,

    /// Peer addresses whose `X-Forwarded-For` header rewrites the
    /// client's remote address.
    pub trusted_proxies: Vec<String>,

    /// CORS behavior for HTTP responses and handshake origin checks.
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            max_message_size: default_max_message_size(),
            auth_key: None,
            queue_file: default_queue_file(),
            health_check_path: None,
            trusted_proxies: Vec::new(),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// The `host:port` string handed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CORS allow-lists and preflight settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed for CORS and WebSocket handshakes. `*` matches
    /// any origin.
    pub allowed_origins: Vec<String>,

    /// Methods advertised in preflight responses.
    pub allowed_methods: Vec<String>,

    /// Headers advertised in preflight responses.
    pub allowed_headers: Vec<String>,

    /// Emits `Access-Control-Allow-Credentials: true` when enabled.
    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds.
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: default_methods(),
            allowed_headers: default_headers(),
            allow_credentials: false,
            max_age: default_max_age(),
        }
    }
}

impl CorsConfig {
    /// Whether an origin passes the allow-list. An absent origin always
    /// passes: no CORS constraint applies.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed == origin),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6001
}

fn default_max_message_size() -> usize {
    65536
}

fn default_queue_file() -> String {
    "weld-queue.jsonl".to_string()
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS", "PATCH", "HEAD"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_headers() -> Vec<String> {
    ["Content-Type", "Authorization", "X-Requested-With"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_age() -> u64 {
    86400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:6001");
        assert!(!config.debug);
        assert_eq!(config.max_message_size, 65536);
        assert!(config.auth_key.is_none());
        assert!(config.health_check_path.is_none());
        assert_eq!(config.cors.allowed_origins, vec!["*"]);
        assert!(!config.cors.allow_credentials);
        assert_eq!(config.cors.max_age, 86400);
    }

    #[test]
    fn wildcard_origin_matches_anything() {
        let cors = CorsConfig::default();
        assert!(cors.origin_allowed(Some("https://anywhere.example")));
        assert!(cors.origin_allowed(None));
    }

    #[test]
    fn explicit_origin_list() {
        let cors = CorsConfig {
            allowed_origins: vec!["https://a.example".into()],
            ..CorsConfig::default()
        };
        assert!(cors.origin_allowed(Some("https://a.example")));
        assert!(!cors.origin_allowed(Some("https://b.example")));
        assert!(cors.origin_allowed(None));
    }

    #[test]
    fn deserializes_partial_config() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"port": 9000, "cors": {"allow_credentials": true}}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.cors.allow_credentials);
        assert_eq!(config.cors.allowed_origins, vec!["*"]);
    }
}
