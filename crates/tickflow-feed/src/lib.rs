//! Market data normalization, history, and subscription interest.
//!
//! Sits between the venue WebSocket client and the fan-out layers:
//! frames become typed events, events feed the per-key history ring,
//! and the registry de-duplicates upstream interest across consumers.

pub mod error;
pub mod history;
pub mod parser;
pub mod registry;

pub use error::{FeedError, FeedResult};
pub use history::{BookCache, HistoryStore, DEFAULT_HISTORY_CAPACITY};
pub use parser::{FeedEvent, FrameParser, ParserStats};
pub use registry::SubscriptionRegistry;
