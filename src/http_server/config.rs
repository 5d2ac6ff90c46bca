//! HTTP Server Configuration
//!
//! Listen address, request timeout and optional bearer token.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::TideConfig;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Host to bind to (default: "127.0.0.1")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 50051)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request deadline in milliseconds (default: 5000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Bearer token required on `/v1` routes
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            auth_token: None,
        }
    }
}

impl From<&TideConfig> for HttpServerConfig {
    fn from(config: &TideConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            request_timeout_ms: config.request_timeout_ms,
            auth_token: config.auth_token.clone(),
        }
    }
}

impl HttpServerConfig {
    /// Create a new config with specified port
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 50051);
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_socket_addr() {
        let config = HttpServerConfig::with_port(8080);
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_from_tide_config() {
        let tide = TideConfig {
            port: 9100,
            request_timeout_ms: 250,
            auth_token: Some("t".to_string()),
            ..Default::default()
        };
        let config = HttpServerConfig::from(&tide);
        assert_eq!(config.port, 9100);
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.auth_token.as_deref(), Some("t"));
    }
}
