//! Upstream subscription interest tracking.
//!
//! Independent consumers (gateway clients, the book pipeline) share one
//! upstream connection per venue. The registry reference-counts interest
//! per key so only the first consumer triggers an upstream subscribe and
//! only the last release triggers an upstream unsubscribe.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tickflow_core::FeedKey;
use tracing::debug;

/// Reference-counted set of keys with upstream interest.
///
/// `register` and `release` are check-and-set under the key's shard lock,
/// so two consumers racing on the same key still observe exactly one
/// first-registration and one last-release.
pub struct SubscriptionRegistry {
    interests: DashMap<FeedKey, usize>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            interests: DashMap::new(),
        }
    }

    /// Register interest in `key`.
    ///
    /// Returns true only for the first registration; that caller owns the
    /// upstream subscribe side effect. Later callers bump the count and
    /// perform no upstream action.
    pub fn register(&self, key: &FeedKey) -> bool {
        let mut count = self.interests.entry(key.clone()).or_insert(0);
        *count += 1;
        let is_new = *count == 1;
        debug!(%key, count = *count, is_new, "Registered interest");
        is_new
    }

    /// Release one unit of interest in `key`.
    ///
    /// Returns true only when the count reaches zero; that caller owns the
    /// upstream unsubscribe side effect. Releasing an unknown key is a
    /// no-op returning false.
    pub fn release(&self, key: &FeedKey) -> bool {
        match self.interests.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let count = entry.get_mut();
                *count = count.saturating_sub(1);
                if *count == 0 {
                    entry.remove();
                    debug!(%key, "Last interest released");
                    true
                } else {
                    debug!(%key, count = *count, "Interest released");
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Current reference count for `key` (0 if unknown).
    pub fn interest_count(&self, key: &FeedKey) -> usize {
        self.interests.get(key).map(|count| *count).unwrap_or(0)
    }

    /// Whether any consumer currently holds interest in `key`.
    pub fn is_active(&self, key: &FeedKey) -> bool {
        self.interests.contains_key(key)
    }

    /// All keys with active interest.
    pub fn active_keys(&self) -> Vec<FeedKey> {
        self.interests
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of distinct keys with active interest.
    pub fn len(&self) -> usize {
        self.interests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interests.is_empty()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_registration_is_new() {
        let registry = SubscriptionRegistry::new();
        let key = FeedKey::from("btc/usd");

        assert!(registry.register(&key));
        assert!(!registry.register(&key));
        assert_eq!(registry.interest_count(&key), 2);
    }

    #[test]
    fn test_release_fires_only_at_zero() {
        let registry = SubscriptionRegistry::new();
        let key = FeedKey::from("btc/usd");

        registry.register(&key);
        registry.register(&key);

        assert!(!registry.release(&key));
        assert!(registry.release(&key));
        assert!(!registry.is_active(&key));
    }

    #[test]
    fn test_release_unknown_key_is_noop() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.release(&FeedKey::from("nope")));
    }

    #[test]
    fn test_reregister_after_full_release_is_new_again() {
        let registry = SubscriptionRegistry::new();
        let key = FeedKey::from("eth/usd");

        assert!(registry.register(&key));
        assert!(registry.release(&key));
        assert!(registry.register(&key));
    }

    #[test]
    fn test_concurrent_registration_yields_one_winner() {
        let registry = Arc::new(SubscriptionRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register(&FeedKey::from("btc/usd")))
            })
            .collect();

        let new_count = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|is_new| *is_new)
            .count();

        assert_eq!(new_count, 1);
        assert_eq!(registry.interest_count(&FeedKey::from("btc/usd")), 8);
    }

    #[test]
    fn test_active_keys() {
        let registry = SubscriptionRegistry::new();
        registry.register(&FeedKey::from("btc/usd"));
        registry.register(&FeedKey::from("eth/usd"));

        let mut keys = registry.active_keys();
        keys.sort();
        assert_eq!(keys, vec![FeedKey::from("btc/usd"), FeedKey::from("eth/usd")]);
    }
}
