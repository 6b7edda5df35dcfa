//! Browser client wire protocol.
//!
//! Inbound and outbound frames are separate types on purpose: clients only
//! send control messages, the server only data frames. Both directions are
//! tagged with a snake_case `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tickflow_core::{now_ms, FeedKey};

/// Messages a browser client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving updates for a key.
    Subscribe { key: FeedKey },
    /// Stop receiving updates for a key.
    Unsubscribe { key: FeedKey },
    /// Liveness probe; answered with a heartbeat frame.
    Ping,
}

/// Frames the gateway pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Current state for a key, sent once per subscribe. Price keys carry
    /// the full history window as an array, order-book keys the latest book.
    Snapshot {
        key: FeedKey,
        payload: Value,
        timestamp: i64,
    },
    /// A single new value for a key.
    Update {
        key: FeedKey,
        payload: Value,
        timestamp: i64,
    },
    /// Periodic liveness signal, also sent in reply to a ping.
    Heartbeat { timestamp: i64 },
}

impl ServerFrame {
    pub fn snapshot(key: FeedKey, payload: Value, timestamp: i64) -> Self {
        Self::Snapshot {
            key,
            payload,
            timestamp,
        }
    }

    pub fn update(key: FeedKey, payload: Value, timestamp: i64) -> Self {
        Self::Update {
            key,
            payload,
            timestamp,
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: now_ms(),
        }
    }

    /// Frame tag, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => "snapshot",
            Self::Update { .. } => "update",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}
