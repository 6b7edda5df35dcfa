//! Active upstream subscription set.
//!
//! The connection manager owns one `SubscriptionSet`: the keys it must
//! (re)subscribe on every connect. The set is seeded from configuration
//! and mutated at runtime through `UpstreamCommand`s, so a reconnect
//! always restores keys that were added after startup.

use crate::message::{StreamTarget, StreamTopic};
use parking_lot::RwLock;
use std::collections::HashMap;
use tickflow_core::FeedKey;

/// Command injected into the connection loop from other components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    /// Subscribe a fresh key; sent incrementally while connected.
    Subscribe(StreamTarget),
    /// Release a key whose last consumer went away.
    Unsubscribe(FeedKey),
}

/// Thread-safe set of active upstream subscriptions, one topic per key.
#[derive(Default)]
pub struct SubscriptionSet {
    targets: RwLock<HashMap<FeedKey, StreamTopic>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target. Returns false when the key was already present.
    pub fn add(&self, target: StreamTarget) -> bool {
        self.targets
            .write()
            .insert(target.key, target.topic)
            .is_none()
    }

    /// Remove a key. Returns the removed target when it was present.
    pub fn remove(&self, key: &FeedKey) -> Option<StreamTarget> {
        self.targets
            .write()
            .remove(key)
            .map(|topic| StreamTarget { key: key.clone(), topic })
    }

    pub fn contains(&self, key: &FeedKey) -> bool {
        self.targets.read().contains_key(key)
    }

    /// Current targets in deterministic (key) order, for batch subscribe.
    pub fn snapshot(&self) -> Vec<StreamTarget> {
        let mut targets: Vec<StreamTarget> = self
            .targets
            .read()
            .iter()
            .map(|(key, topic)| StreamTarget {
                key: key.clone(),
                topic: *topic,
            })
            .collect();
        targets.sort_by(|a, b| a.key.cmp(&b.key));
        targets
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_deduplicated() {
        let set = SubscriptionSet::new();
        assert!(set.add(StreamTarget::prices("btc/usd")));
        assert!(!set.add(StreamTarget::prices("btc/usd")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_returns_target() {
        let set = SubscriptionSet::new();
        set.add(StreamTarget::order_book("0xabc"));

        let removed = set.remove(&FeedKey::from("0xabc")).unwrap();
        assert_eq!(removed.topic, StreamTopic::OrderBook);
        assert!(set.is_empty());
        assert!(set.remove(&FeedKey::from("0xabc")).is_none());
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let set = SubscriptionSet::new();
        set.add(StreamTarget::prices("eth/usd"));
        set.add(StreamTarget::prices("btc/usd"));

        let snapshot = set.snapshot();
        assert_eq!(snapshot[0].key.as_str(), "btc/usd");
        assert_eq!(snapshot[1].key.as_str(), "eth/usd");
    }
}
