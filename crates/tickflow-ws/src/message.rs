//! Venue wire protocol types.
//!
//! Outbound subscribe requests and inbound data frames are JSON text
//! frames. One subscribe request can carry many subscription entries, so
//! a full key set is restored in a single round trip after (re)connect.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tickflow_core::FeedKey;

/// Frame type for an initial bulk history payload.
pub const FRAME_SNAPSHOT: &str = "snapshot";
/// Frame type for a single incremental data point.
pub const FRAME_UPDATE: &str = "update";

/// Upstream data category.
///
/// Each category maps to a fixed topic string on the wire and to one
/// cluster bus channel downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTopic {
    /// Price tick stream, keyed by venue symbol.
    Prices,
    /// Order-book stream, keyed by venue asset id.
    OrderBook,
}

impl StreamTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prices => "prices",
            Self::OrderBook => "orderbook",
        }
    }

    /// Parse a topic string from an inbound frame.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "prices" => Some(Self::Prices),
            "orderbook" => Some(Self::OrderBook),
            _ => None,
        }
    }
}

impl fmt::Display for StreamTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One upstream subscription: a key within a data category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    /// Key the venue filters on (symbol for prices, asset id for books).
    pub key: FeedKey,
    /// Data category the key belongs to.
    pub topic: StreamTopic,
}

impl StreamTarget {
    pub fn prices(key: impl Into<FeedKey>) -> Self {
        Self {
            key: key.into(),
            topic: StreamTopic::Prices,
        }
    }

    pub fn order_book(key: impl Into<FeedKey>) -> Self {
        Self {
            key: key.into(),
            topic: StreamTopic::OrderBook,
        }
    }
}

/// One entry inside a subscribe request.
///
/// `filters` is either empty (all symbols on the topic) or a
/// JSON-encoded filter object selecting a single key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub filters: String,
}

impl SubscriptionEntry {
    /// Entry selecting a single key on its topic.
    pub fn for_target(target: &StreamTarget) -> Self {
        let filters = match target.topic {
            StreamTopic::Prices => {
                serde_json::json!({ "symbol": target.key.as_str() }).to_string()
            }
            StreamTopic::OrderBook => {
                serde_json::json!({ "asset_id": target.key.as_str() }).to_string()
            }
        };
        Self {
            topic: target.topic.as_str().to_string(),
            kind: FRAME_UPDATE.to_string(),
            filters,
        }
    }

    /// Entry selecting every key on a topic (empty filters).
    pub fn all(topic: StreamTopic) -> Self {
        Self {
            topic: topic.as_str().to_string(),
            kind: FRAME_UPDATE.to_string(),
            filters: String::new(),
        }
    }
}

/// Outbound subscribe/unsubscribe request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub action: String,
    pub subscriptions: Vec<SubscriptionEntry>,
}

impl SubscribeRequest {
    /// Batch request covering every given target in one message.
    pub fn batch(targets: &[StreamTarget]) -> Self {
        Self {
            action: "subscribe".to_string(),
            subscriptions: targets.iter().map(SubscriptionEntry::for_target).collect(),
        }
    }

    /// Incremental request for one freshly added key.
    pub fn single(target: &StreamTarget) -> Self {
        Self {
            action: "subscribe".to_string(),
            subscriptions: vec![SubscriptionEntry::for_target(target)],
        }
    }

    /// Release one key upstream.
    pub fn unsubscribe(target: &StreamTarget) -> Self {
        Self {
            action: "unsubscribe".to_string(),
            subscriptions: vec![SubscriptionEntry::for_target(target)],
        }
    }
}

/// Inbound venue frame.
///
/// `payload` stays untyped here; classification into domain events is the
/// parser's job, and unrecognized topic/type combinations must survive
/// deserialization so they can be ignored instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VenueFrame {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl VenueFrame {
    pub fn is_snapshot(&self) -> bool {
        self.kind == FRAME_SNAPSHOT
    }

    pub fn is_update(&self) -> bool {
        self.kind == FRAME_UPDATE
    }
}
