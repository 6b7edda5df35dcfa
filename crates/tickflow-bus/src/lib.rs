//! Cluster-wide pub/sub fan-out.
//!
//! Decouples the process holding the upstream venue connection from the
//! processes serving browser clients. See `bus` for delivery semantics.

pub mod bus;
pub mod error;
pub mod topic;

pub use bus::{BusConfig, BusStats, ClusterBus, LocalFanout};
pub use error::{BusError, BusResult};
pub use topic::{BusMessage, BusTopic, CHANNEL_BOOKS, CHANNEL_CACHE, CHANNEL_TICKS};
