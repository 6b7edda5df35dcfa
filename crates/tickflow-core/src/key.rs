//! Feed key identification.
//!
//! A `FeedKey` names one instrument stream (e.g., a venue symbol like
//! "btc/usd" or an order-book asset id). The relay treats keys as opaque:
//! which keys exist and what they mean is decided by configuration and by
//! subscribing clients, never by this crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for one instrument stream.
///
/// This is the primary key for history buffers, subscription interest and
/// client routing. Serializes as a plain JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedKey(String);

impl FeedKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FeedKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FeedKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for FeedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_roundtrip() {
        let key = FeedKey::from("btc/usd");
        assert_eq!(key.to_string(), "btc/usd");
        assert_eq!(key.as_str(), "btc/usd");
    }

    #[test]
    fn test_serde_transparent() {
        let key = FeedKey::from("eth/usd");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"eth/usd\"");

        let back: FeedKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(FeedKey::from("btc/usd"), 1u32);
        assert_eq!(map.get(&FeedKey::from("btc/usd")), Some(&1));
    }
}
