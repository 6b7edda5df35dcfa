//! Bus channel naming and message envelope.

use std::fmt;
use std::sync::Arc;

/// Redis channel for price ticks.
pub const CHANNEL_TICKS: &str = "tickflow.ticks";

/// Redis channel for order-book updates.
pub const CHANNEL_BOOKS: &str = "tickflow.books";

/// Redis channel for cache-invalidation signals.
///
/// Consumed by collaborators outside this pipeline; the bus carries it so
/// every process sees invalidations without a second transport.
pub const CHANNEL_CACHE: &str = "tickflow.cache";

/// Event category, one fixed channel each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusTopic {
    Ticks,
    Books,
    CacheInvalidation,
}

impl BusTopic {
    /// Every topic the bus subscribes to.
    pub const ALL: [BusTopic; 3] = [Self::Ticks, Self::Books, Self::CacheInvalidation];

    pub fn as_channel(&self) -> &'static str {
        match self {
            Self::Ticks => CHANNEL_TICKS,
            Self::Books => CHANNEL_BOOKS,
            Self::CacheInvalidation => CHANNEL_CACHE,
        }
    }

    pub fn from_channel(channel: &str) -> Option<Self> {
        match channel {
            CHANNEL_TICKS => Some(Self::Ticks),
            CHANNEL_BOOKS => Some(Self::Books),
            CHANNEL_CACHE => Some(Self::CacheInvalidation),
            _ => None,
        }
    }
}

impl fmt::Display for BusTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_channel())
    }
}

/// One message delivered through the bus.
///
/// The payload is a pre-serialized JSON string; it is shared, not cloned,
/// when fanned out to many local subscribers.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: BusTopic,
    pub payload: Arc<str>,
}

impl BusMessage {
    pub fn new(topic: BusTopic, payload: impl Into<Arc<str>>) -> Self {
        Self {
            topic,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_are_fixed() {
        assert_eq!(BusTopic::Ticks.as_channel(), "tickflow.ticks");
        assert_eq!(BusTopic::Books.as_channel(), "tickflow.books");
        assert_eq!(BusTopic::CacheInvalidation.as_channel(), "tickflow.cache");
    }

    #[test]
    fn test_channel_roundtrip() {
        for topic in BusTopic::ALL {
            assert_eq!(BusTopic::from_channel(topic.as_channel()), Some(topic));
        }
        assert_eq!(BusTopic::from_channel("tickflow.unknown"), None);
    }

    #[test]
    fn test_message_payload_is_shared() {
        let message = BusMessage::new(BusTopic::Ticks, "{\"key\":\"btc/usd\"}");
        let clone = message.clone();
        assert!(Arc::ptr_eq(&message.payload, &clone.payload));
    }
}
