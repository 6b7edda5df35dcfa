//! Gateway configuration.

use serde::{Deserialize, Serialize};

/// Client gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent WebSocket clients.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Outbound frames buffered per client; a full buffer evicts the client.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    1024
}

fn default_client_buffer() -> usize {
    256
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            client_buffer: default_client_buffer(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl GatewayConfig {
    /// Address string for the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 1024);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: GatewayConfig = serde_json::from_str(r#"{"port": 9001}"#).unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.client_buffer, 256);
    }
}
