//! Application configuration.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tickflow_bus::BusConfig;
use tickflow_core::FeedKey;
use tickflow_gateway::GatewayConfig;
use tickflow_ws::{ConnectionConfig, StreamTarget};

use crate::error::{AppError, AppResult};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Venue adapter settings.
    #[serde(default)]
    pub venue: VenueConfig,
    /// Per-key history ring settings.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Cluster bus settings.
    #[serde(default)]
    pub bus: BusSettings,
    /// Client gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Venue adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Run the venue adapter in this process. Disabled processes serve
    /// clients from the cluster bus only.
    #[serde(default = "default_venue_enabled")]
    pub enabled: bool,
    /// Venue WebSocket URL. Required when the adapter is enabled.
    #[serde(default)]
    pub url: String,
    /// Price keys subscribed at startup.
    #[serde(default)]
    pub price_keys: Vec<String>,
    /// Order-book keys subscribed at startup.
    #[serde(default)]
    pub book_keys: Vec<String>,
    /// Connection tuning.
    #[serde(default)]
    pub websocket: WsTuning,
}

fn default_venue_enabled() -> bool {
    true
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            enabled: default_venue_enabled(),
            url: String::new(),
            price_keys: Vec::new(),
            book_keys: Vec::new(),
            websocket: WsTuning::default(),
        }
    }
}

impl VenueConfig {
    /// Build the adapter connection config, including startup subscriptions.
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut subscriptions: Vec<StreamTarget> = self
            .price_keys
            .iter()
            .map(|key| StreamTarget::prices(key.as_str()))
            .collect();
        subscriptions.extend(
            self.book_keys
                .iter()
                .map(|key| StreamTarget::order_book(key.as_str())),
        );

        ConnectionConfig {
            url: self.url.clone(),
            max_reconnect_attempts: self.websocket.max_reconnect_attempts,
            reconnect_base_delay_ms: self.websocket.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.websocket.reconnect_max_delay_ms,
            ping_interval_ms: self.websocket.ping_interval_ms,
            silence_check_interval_ms: self.websocket.silence_check_interval_ms,
            silence_timeout_ms: self.websocket.silence_timeout_ms,
            subscriptions,
        }
    }

    /// All keys configured at startup, price and book alike.
    pub fn configured_keys(&self) -> Vec<FeedKey> {
        self.price_keys
            .iter()
            .chain(self.book_keys.iter())
            .map(|key| FeedKey::from(key.as_str()))
            .collect()
    }

    /// Book keys as a lookup set for topic selection.
    pub fn book_key_set(&self) -> HashSet<FeedKey> {
        self.book_keys
            .iter()
            .map(|key| FeedKey::from(key.as_str()))
            .collect()
    }
}

/// WebSocket tuning subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsTuning {
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for reconnection backoff (ms).
    pub reconnect_base_delay_ms: u64,
    /// Cap for reconnection backoff (ms).
    pub reconnect_max_delay_ms: u64,
    /// Protocol ping interval while connected (ms).
    pub ping_interval_ms: u64,
    /// Silence watchdog check cadence (ms).
    pub silence_check_interval_ms: u64,
    /// Silence window after which the connection is treated as dead (ms).
    pub silence_timeout_ms: u64,
}

impl Default for WsTuning {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: 2_000,
            reconnect_max_delay_ms: 30_000,
            ping_interval_ms: 30_000,
            silence_check_interval_ms: 15_000,
            silence_timeout_ms: 120_000,
        }
    }
}

/// History ring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Points retained per key; the oldest are evicted first.
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

fn default_history_capacity() -> usize {
    tickflow_feed::DEFAULT_HISTORY_CAPACITY
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

/// Cluster bus configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusSettings {
    /// Redis-compatible URL. Omit to run local-only without a cluster bus.
    #[serde(default)]
    pub url: Option<String>,
    /// Per-topic local fan-out channel capacity.
    #[serde(default = "default_bus_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_bus_channel_capacity() -> usize {
    1_024
}

impl BusSettings {
    pub fn to_bus_config(&self) -> BusConfig {
        BusConfig {
            url: self.url.clone(),
            channel_capacity: self.channel_capacity.max(16),
            ..BusConfig::default()
        }
    }
}

impl AppConfig {
    /// Load configuration from `TICKFLOW_CONFIG` or the default path,
    /// falling back to defaults when no file exists.
    pub fn load() -> AppResult<Self> {
        let config_path =
            std::env::var("TICKFLOW_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.venue.enabled && self.venue.url.is_empty() {
            return Err(AppError::Config(
                "venue.url is required when the venue adapter is enabled".to_string(),
            ));
        }
        if self.history.capacity == 0 {
            return Err(AppError::Config(
                "history.capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_ws::StreamTopic;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.venue.enabled);
        assert_eq!(config.history.capacity, 3600);
        assert!(config.bus.url.is_none());
        assert_eq!(config.gateway.port, 8080);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let toml = r#"
            [venue]
            url = "wss://venue.test/ws"
            price_keys = ["btc/usd", "eth/usd"]
            book_keys = ["0xabc"]

            [bus]
            url = "redis://127.0.0.1:6379"

            [gateway]
            port = 9000
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.venue.price_keys.len(), 2);
        assert_eq!(config.bus.url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.venue.websocket.silence_timeout_ms, 120_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_requires_url_when_enabled() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());

        let mut disabled = AppConfig::default();
        disabled.venue.enabled = false;
        disabled.validate().unwrap();
    }

    #[test]
    fn test_connection_config_merges_key_lists() {
        let mut config = VenueConfig::default();
        config.url = "wss://venue.test/ws".to_string();
        config.price_keys = vec!["btc/usd".to_string()];
        config.book_keys = vec!["0xabc".to_string()];

        let connection = config.connection_config();
        assert_eq!(connection.url, "wss://venue.test/ws");
        assert_eq!(connection.subscriptions.len(), 2);
        assert_eq!(connection.subscriptions[0].topic, StreamTopic::Prices);
        assert_eq!(connection.subscriptions[1].topic, StreamTopic::OrderBook);

        let books = config.book_key_set();
        assert!(books.contains(&FeedKey::from("0xabc")));
        assert_eq!(config.configured_keys().len(), 2);
    }
}
