//! Upstream venue WebSocket client for tickflow.
//!
//! Provides robust connectivity to push-style market data feeds:
//! - Automatic reconnection with exponential backoff (2s doubling, 30s cap)
//! - Batch subscription on connect, incremental subscribe at runtime
//! - Protocol-level heartbeat pings and an application-silence watchdog
//! - Channel-based frame delivery to the ingestion pipeline

pub mod connection;
pub mod error;
pub mod liveness;
pub mod message;
pub mod subscription;

pub use connection::{
    backoff_delay, next_state, ConnectionConfig, ConnectionEvent, ConnectionManager,
    ConnectionState,
};
pub use error::{WsError, WsResult};
pub use liveness::{LivenessMonitor, LivenessStats};
pub use message::{StreamTarget, StreamTopic, SubscribeRequest, SubscriptionEntry, VenueFrame};
pub use subscription::{SubscriptionSet, UpstreamCommand};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
