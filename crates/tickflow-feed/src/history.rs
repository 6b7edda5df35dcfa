//! Per-key market data history.
//!
//! `HistoryStore` keeps a bounded ring of recent price points per key so a
//! freshly subscribing client can be served a snapshot without asking the
//! venue again. `BookCache` keeps only the most recent order book per key;
//! books arrive as full snapshots, so history is one-deep.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tickflow_core::{FeedKey, OrderBookSnapshot, PricePoint};

/// Default ring capacity: one hour of history at ~1 point/sec.
pub const DEFAULT_HISTORY_CAPACITY: usize = 3600;

type Series = Arc<RwLock<VecDeque<PricePoint>>>;

/// Bounded per-key history ring.
///
/// Appends are guarded by a per-key lock; reads clone out so they never
/// hold the lock across caller work. Entries for a key are written by the
/// single adapter task that owns the upstream subscription.
pub struct HistoryStore {
    capacity: usize,
    series: DashMap<FeedKey, Series>,
}

impl HistoryStore {
    /// Create a store where each key holds at most `capacity` points.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: DashMap::new(),
        }
    }

    /// Ring capacity per key.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn get_or_create(&self, key: &FeedKey) -> Series {
        self.series
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(VecDeque::with_capacity(self.capacity))))
            .clone()
    }

    /// Append one point, evicting the oldest when the ring is full.
    pub fn append(&self, point: PricePoint) {
        let series = self.get_or_create(&point.key);
        let mut buf = series.write();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(point);
    }

    /// Replace the series for `key` with a venue-provided history snapshot.
    ///
    /// Only the newest `capacity` points are kept.
    pub fn seed(&self, key: &FeedKey, points: Vec<PricePoint>) {
        let series = self.get_or_create(key);
        let mut buf = series.write();
        buf.clear();
        let skip = points.len().saturating_sub(self.capacity);
        buf.extend(points.into_iter().skip(skip));
    }

    /// Full series for `key` in insertion order (oldest first).
    pub fn read_all(&self, key: &FeedKey) -> Vec<PricePoint> {
        self.series
            .get(key)
            .map(|series| series.read().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent point for `key`.
    pub fn latest(&self, key: &FeedKey) -> Option<PricePoint> {
        self.series
            .get(key)
            .and_then(|series| series.read().back().cloned())
    }

    /// Number of points currently held for `key`.
    pub fn len(&self, key: &FeedKey) -> usize {
        self.series
            .get(key)
            .map(|series| series.read().len())
            .unwrap_or(0)
    }

    /// All keys with at least one recorded point.
    pub fn keys(&self) -> Vec<FeedKey> {
        self.series.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Latest order book per key.
pub struct BookCache {
    books: DashMap<FeedKey, OrderBookSnapshot>,
}

impl BookCache {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
        }
    }

    /// Store the newest book for its key, replacing any previous one.
    pub fn update(&self, book: OrderBookSnapshot) {
        self.books.insert(book.key.clone(), book);
    }

    /// Most recent book for `key`.
    pub fn latest(&self, key: &FeedKey) -> Option<OrderBookSnapshot> {
        self.books.get(key).map(|book| book.clone())
    }

    /// All keys with a cached book.
    pub fn keys(&self) -> Vec<FeedKey> {
        self.books.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for BookCache {
    fn default() -> Self {
        Self::new()
    }
}
