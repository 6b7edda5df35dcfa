//! Venue frame normalization.
//!
//! Classifies inbound frames into typed feed events. Frames with an
//! unrecognized topic/type combination are ignored; frames with a
//! recognized shape but an unparsable payload are reported as errors so
//! the caller can log and drop them. Neither outcome touches the
//! connection.
//!
//! The venue sends numeric values either as JSON strings or as plain
//! numbers depending on the stream; both are accepted and parsed through
//! their text rendering so no float rounding is introduced.

use crate::error::{FeedError, FeedResult};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tickflow_core::{FeedKey, OrderBookSnapshot, PriceLevel, PricePoint};
use tickflow_ws::message::{FRAME_SNAPSHOT, FRAME_UPDATE};
use tickflow_ws::{StreamTopic, VenueFrame};
use tracing::debug;

/// Frame classification counters.
#[derive(Debug, Default)]
pub struct ParserStats {
    /// Frames successfully turned into events.
    pub accepted_count: AtomicU64,
    /// Frames with an unrecognized topic/type combination.
    pub ignored_count: AtomicU64,
    /// Recognized frames whose payload failed to parse.
    pub malformed_count: AtomicU64,
}

impl ParserStats {
    pub fn record_accepted(&self) {
        self.accepted_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.ignored_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted_count.load(Ordering::Relaxed)
    }

    pub fn ignored(&self) -> u64 {
        self.ignored_count.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed_count.load(Ordering::Relaxed)
    }
}

/// Price history payload: `{"symbol": ..., "data": [{timestamp, value}]}`.
#[derive(Debug, Deserialize)]
pub struct RawPriceHistory {
    pub symbol: String,
    pub data: Vec<RawHistoryPoint>,
}

/// One point inside a history payload.
#[derive(Debug, Deserialize)]
pub struct RawHistoryPoint {
    pub timestamp: i64,
    pub value: Value,
}

/// Price tick payload: `{"symbol": ..., "timestamp": ..., "value": ...}`.
#[derive(Debug, Deserialize)]
pub struct RawPriceTick {
    pub symbol: String,
    pub timestamp: i64,
    pub value: Value,
}

/// One order-book level; price/size arrive as strings or numbers.
#[derive(Debug, Deserialize)]
pub struct RawBookLevel {
    pub price: Value,
    pub size: Value,
}

/// Order-book payload, a self-contained book for one asset id.
#[derive(Debug, Deserialize)]
pub struct RawBook {
    pub asset_id: String,
    #[serde(default)]
    pub market: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub bids: Vec<RawBookLevel>,
    #[serde(default)]
    pub asks: Vec<RawBookLevel>,
    #[serde(default)]
    pub last_trade_price: Option<Value>,
}

/// Normalized market data event.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Initial bulk history for a key, sent once per subscription.
    PriceHistory {
        key: FeedKey,
        points: Vec<PricePoint>,
    },
    /// A single new price tick.
    PriceTick(PricePoint),
    /// Full order-book state for a key.
    BookUpdate(OrderBookSnapshot),
}

impl FeedEvent {
    /// Key this event belongs to.
    pub fn key(&self) -> &FeedKey {
        match self {
            Self::PriceHistory { key, .. } => key,
            Self::PriceTick(point) => &point.key,
            Self::BookUpdate(book) => &book.key,
        }
    }
}

/// Venue frame parser.
pub struct FrameParser {
    stats: ParserStats,
}

impl FrameParser {
    /// Create a new frame parser.
    pub fn new() -> Self {
        Self {
            stats: ParserStats::default(),
        }
    }

    /// Classification statistics.
    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    /// Classify one inbound frame into a feed event.
    ///
    /// Returns `Ok(None)` for unrecognized topic/type combinations.
    pub fn parse_frame(&self, frame: &VenueFrame) -> FeedResult<Option<FeedEvent>> {
        let Some(topic) = StreamTopic::from_str(&frame.topic) else {
            self.stats.record_ignored();
            debug!(topic = %frame.topic, "Ignoring frame for unknown topic");
            return Ok(None);
        };

        let result = match (topic, frame.kind.as_str()) {
            (StreamTopic::Prices, FRAME_SNAPSHOT) => self.parse_price_history(&frame.payload),
            (StreamTopic::Prices, FRAME_UPDATE) => self.parse_price_tick(&frame.payload),
            // Books are self-contained; snapshot and update carry the
            // same shape.
            (StreamTopic::OrderBook, FRAME_SNAPSHOT | FRAME_UPDATE) => {
                self.parse_book(&frame.payload)
            }
            _ => {
                self.stats.record_ignored();
                debug!(topic = %frame.topic, kind = %frame.kind, "Ignoring unknown frame type");
                return Ok(None);
            }
        };

        match &result {
            Ok(_) => self.stats.record_accepted(),
            Err(_) => self.stats.record_malformed(),
        }
        result.map(Some)
    }

    fn parse_price_history(&self, payload: &Value) -> FeedResult<FeedEvent> {
        let raw: RawPriceHistory = serde_json::from_value(payload.clone())
            .map_err(|e| FeedError::ParseError(format!("Invalid price history: {e}")))?;

        let key = FeedKey::from(raw.symbol);
        let mut points = Vec::with_capacity(raw.data.len());
        for raw_point in &raw.data {
            let price = self.parse_decimal(&raw_point.value)?;
            points.push(PricePoint::new(key.clone(), price, raw_point.timestamp));
        }

        debug!(%key, count = points.len(), "Price history frame");
        Ok(FeedEvent::PriceHistory { key, points })
    }

    fn parse_price_tick(&self, payload: &Value) -> FeedResult<FeedEvent> {
        let raw: RawPriceTick = serde_json::from_value(payload.clone())
            .map_err(|e| FeedError::ParseError(format!("Invalid price tick: {e}")))?;

        let price = self.parse_decimal(&raw.value)?;
        let point = PricePoint::new(raw.symbol, price, raw.timestamp);

        debug!(key = %point.key, price = %point.price, "Price tick");
        Ok(FeedEvent::PriceTick(point))
    }

    fn parse_book(&self, payload: &Value) -> FeedResult<FeedEvent> {
        let raw: RawBook = serde_json::from_value(payload.clone())
            .map_err(|e| FeedError::ParseError(format!("Invalid order book: {e}")))?;

        let bids = self.parse_levels(&raw.bids)?;
        let asks = self.parse_levels(&raw.asks)?;
        let last_trade_price = match &raw.last_trade_price {
            Some(value) if !value.is_null() => Some(self.parse_decimal(value)?),
            _ => None,
        };

        let book = OrderBookSnapshot {
            key: FeedKey::from(raw.asset_id),
            market_ref: raw.market.unwrap_or_default(),
            bids,
            asks,
            last_trade_price,
            timestamp_ms: raw.timestamp,
        };

        debug!(key = %book.key, bids = book.bids.len(), asks = book.asks.len(), "Book update");
        Ok(FeedEvent::BookUpdate(book))
    }

    fn parse_levels(&self, levels: &[RawBookLevel]) -> FeedResult<Vec<PriceLevel>> {
        levels
            .iter()
            .map(|level| {
                Ok(PriceLevel::new(
                    self.parse_decimal(&level.price)?,
                    self.parse_decimal(&level.size)?,
                ))
            })
            .collect()
    }

    fn parse_decimal(&self, value: &Value) -> FeedResult<Decimal> {
        match value {
            Value::String(s) => s
                .parse()
                .map_err(|_| FeedError::ParseError(format!("Invalid decimal: {s}"))),
            Value::Number(n) => n
                .to_string()
                .parse()
                .map_err(|_| FeedError::ParseError(format!("Invalid decimal: {n}"))),
            other => Err(FeedError::ParseError(format!(
                "Expected decimal, got {other}"
            ))),
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn frame(topic: &str, kind: &str, payload: Value) -> VenueFrame {
        VenueFrame {
            topic: topic.to_string(),
            kind: kind.to_string(),
            payload,
        }
    }

    #[test]
    fn test_parse_price_tick_string_value() {
        let parser = FrameParser::new();
        let f = frame(
            "prices",
            "update",
            json!({"symbol": "btc/usd", "timestamp": 1700000000000i64, "value": "64250.5"}),
        );

        let event = parser.parse_frame(&f).unwrap().unwrap();
        if let FeedEvent::PriceTick(point) = event {
            assert_eq!(point.key.as_str(), "btc/usd");
            assert_eq!(point.price, dec!(64250.5));
            assert_eq!(point.timestamp_ms, 1_700_000_000_000);
        } else {
            panic!("Expected PriceTick");
        }

        assert_eq!(parser.stats().accepted(), 1);
    }

    #[test]
    fn test_parse_price_tick_numeric_value() {
        let parser = FrameParser::new();
        let f = frame(
            "prices",
            "update",
            json!({"symbol": "eth/usd", "timestamp": 1, "value": 3000.25}),
        );

        let event = parser.parse_frame(&f).unwrap().unwrap();
        if let FeedEvent::PriceTick(point) = event {
            assert_eq!(point.price, dec!(3000.25));
        } else {
            panic!("Expected PriceTick");
        }
    }

    #[test]
    fn test_parse_price_history() {
        let parser = FrameParser::new();
        let f = frame(
            "prices",
            "snapshot",
            json!({
                "symbol": "btc/usd",
                "data": [
                    {"timestamp": 1, "value": "100"},
                    {"timestamp": 2, "value": "101"},
                    {"timestamp": 3, "value": "102"}
                ]
            }),
        );

        let event = parser.parse_frame(&f).unwrap().unwrap();
        if let FeedEvent::PriceHistory { key, points } = event {
            assert_eq!(key.as_str(), "btc/usd");
            assert_eq!(points.len(), 3);
            assert_eq!(points[0].price, dec!(100));
            assert_eq!(points[2].timestamp_ms, 3);
        } else {
            panic!("Expected PriceHistory");
        }
    }

    #[test]
    fn test_parse_book_update() {
        let parser = FrameParser::new();
        let f = frame(
            "orderbook",
            "update",
            json!({
                "asset_id": "0xabc",
                "market": "cond-1",
                "timestamp": 1700000000000i64,
                "bids": [{"price": "0.52", "size": "100"}, {"price": "0.51", "size": "250"}],
                "asks": [{"price": "0.54", "size": "80"}],
                "last_trade_price": "0.53"
            }),
        );

        let event = parser.parse_frame(&f).unwrap().unwrap();
        if let FeedEvent::BookUpdate(book) = event {
            assert_eq!(book.key.as_str(), "0xabc");
            assert_eq!(book.market_ref, "cond-1");
            assert_eq!(book.bids.len(), 2);
            assert_eq!(book.best_bid().unwrap().price, dec!(0.52));
            assert_eq!(book.last_trade_price, Some(dec!(0.53)));
        } else {
            panic!("Expected BookUpdate");
        }
    }

    #[test]
    fn test_parse_book_snapshot_kind_accepted() {
        let parser = FrameParser::new();
        let f = frame(
            "orderbook",
            "snapshot",
            json!({"asset_id": "0xdef", "timestamp": 5, "bids": [], "asks": []}),
        );

        let event = parser.parse_frame(&f).unwrap().unwrap();
        assert!(matches!(event, FeedEvent::BookUpdate(_)));
    }

    #[test]
    fn test_book_null_last_trade_price() {
        let parser = FrameParser::new();
        let f = frame(
            "orderbook",
            "update",
            json!({"asset_id": "0xabc", "timestamp": 5, "bids": [], "asks": [], "last_trade_price": null}),
        );

        let event = parser.parse_frame(&f).unwrap().unwrap();
        if let FeedEvent::BookUpdate(book) = event {
            assert_eq!(book.last_trade_price, None);
        } else {
            panic!("Expected BookUpdate");
        }
    }

    #[test]
    fn test_unknown_topic_ignored() {
        let parser = FrameParser::new();
        let f = frame("trades", "update", json!({}));

        assert!(parser.parse_frame(&f).unwrap().is_none());
        assert_eq!(parser.stats().ignored(), 1);
        assert_eq!(parser.stats().accepted(), 0);
    }

    #[test]
    fn test_unknown_kind_ignored() {
        let parser = FrameParser::new();
        let f = frame("prices", "heartbeat", json!({}));

        assert!(parser.parse_frame(&f).unwrap().is_none());
        assert_eq!(parser.stats().ignored(), 1);
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let parser = FrameParser::new();
        let f = frame("prices", "update", json!({"symbol": "btc/usd"}));

        assert!(parser.parse_frame(&f).is_err());
        assert_eq!(parser.stats().malformed(), 1);
    }

    #[test]
    fn test_invalid_decimal_is_error() {
        let parser = FrameParser::new();
        let f = frame(
            "prices",
            "update",
            json!({"symbol": "btc/usd", "timestamp": 1, "value": "not-a-number"}),
        );

        assert!(parser.parse_frame(&f).is_err());
    }

    #[test]
    fn test_event_key_accessor() {
        let point = PricePoint::new("btc/usd", dec!(1), 0);
        let event = FeedEvent::PriceTick(point);
        assert_eq!(event.key().as_str(), "btc/usd");
    }
}
