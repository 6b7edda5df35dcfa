//! Core domain types for the tickflow market data relay.
//!
//! This crate provides the fundamental types shared by every stage of the
//! distribution pipeline:
//! - `FeedKey`: opaque identifier for one instrument stream
//! - `PricePoint`: a single price tick
//! - `OrderBookSnapshot`, `PriceLevel`: order-book depth data

pub mod error;
pub mod key;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use key::FeedKey;
pub use types::{now_ms, OrderBookSnapshot, PriceLevel, PricePoint};
