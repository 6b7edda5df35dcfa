//! Market data entities carried through the pipeline.
//!
//! Values are pre-normalized by the venue adapter: by the time a
//! `PricePoint` or `OrderBookSnapshot` exists, no further business
//! interpretation happens downstream, only storage and fan-out.

use crate::key::FeedKey;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A single price tick for one key. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Stream this point belongs to.
    pub key: FeedKey,
    /// Tick value.
    pub price: Decimal,
    /// Venue timestamp in Unix milliseconds.
    pub timestamp_ms: i64,
}

impl PricePoint {
    pub fn new(key: impl Into<FeedKey>, price: Decimal, timestamp_ms: i64) -> Self {
        Self {
            key: key.into(),
            price,
            timestamp_ms,
        }
    }
}

/// One side level of an order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Full order-book state for one key at one instant.
///
/// The venue emits these as self-contained updates; consumers replace any
/// previously held book for the same key rather than merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Stream this book belongs to.
    pub key: FeedKey,
    /// Venue-side market reference (e.g., condition or market id).
    pub market_ref: String,
    /// Bid levels, best first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best first.
    pub asks: Vec<PriceLevel>,
    /// Last traded price, if the venue reported one.
    pub last_trade_price: Option<Decimal>,
    /// Venue timestamp in Unix milliseconds.
    pub timestamp_ms: i64,
}

impl OrderBookSnapshot {
    /// Best bid level, if any depth exists.
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask level, if any depth exists.
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}
