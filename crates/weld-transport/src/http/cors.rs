//! CORS preflight handling and response header injection.

use weld_core::CorsConfig;

use super::response::HttpResponse;

/// Applies the configured CORS policy to responses.
#[derive(Debug, Clone)]
pub struct Cors {
    config: CorsConfig,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    /// Whether the origin passes the allow-list (absent origins always do).
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        self.config.origin_allowed(origin)
    }

    /// Answers an `OPTIONS` preflight.
    pub fn preflight(&self, origin: Option<&str>) -> HttpResponse {
        let mut response = HttpResponse::new(204)
            .with_header(
                "Access-Control-Allow-Methods",
                self.config.allowed_methods.join(", "),
            )
            .with_header(
                "Access-Control-Allow-Headers",
                self.config.allowed_headers.join(", "),
            )
            .with_header("Access-Control-Max-Age", self.config.max_age.to_string());
        self.apply(&mut response, origin);
        response
    }

    /// Adds the origin (and credentials) headers to a final response.
    pub fn apply(&self, response: &mut HttpResponse, origin: Option<&str>) {
        if let Some(origin) = origin {
            if self.origin_allowed(Some(origin)) {
                response.set_header("Access-Control-Allow-Origin", origin);
            }
        }
        if self.config.allow_credentials {
            response.set_header("Access-Control-Allow-Credentials", "true");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_carries_policy_headers() {
        let cors = Cors::new(CorsConfig {
            allowed_origins: vec!["https://a.example".into()],
            max_age: 600,
            ..CorsConfig::default()
        });
        let response = cors.preflight(Some("https://a.example"));
        assert_eq!(response.status, 204);
        assert_eq!(
            response.header("Access-Control-Allow-Origin"),
            Some("https://a.example")
        );
        assert!(response.header("Access-Control-Allow-Methods").is_some());
        assert!(response.header("Access-Control-Allow-Headers").is_some());
        assert_eq!(response.header("Access-Control-Max-Age"), Some("600"));
        assert!(response.header("Access-Control-Allow-Credentials").is_none());
    }

    #[test]
    fn disallowed_origin_gets_no_origin_header() {
        let cors = Cors::new(CorsConfig {
            allowed_origins: vec!["https://a.example".into()],
            ..CorsConfig::default()
        });
        let response = cors.preflight(Some("https://evil.example"));
        assert!(response.header("Access-Control-Allow-Origin").is_none());
    }

    #[test]
    fn credentials_header_when_enabled() {
        let cors = Cors::new(CorsConfig {
            allow_credentials: true,
            ..CorsConfig::default()
        });
        let mut response = HttpResponse::new(200);
        cors.apply(&mut response, Some("https://x.example"));
        assert_eq!(
            response.header("Access-Control-Allow-Origin"),
            Some("https://x.example")
        );
        assert_eq!(
            response.header("Access-Control-Allow-Credentials"),
            Some("true")
        );
    }
}
