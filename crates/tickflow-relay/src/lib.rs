//! tickflow relay - market data distribution pipeline.
//!
//! One binary, two deployment shapes controlled by config:
//! - the ingestion process runs the venue adapter, feeds the history ring
//!   and book cache, and publishes every tick to the cluster bus;
//! - delivery processes skip the adapter, mirror bus traffic into local
//!   stores, and serve browser clients through the gateway.
//!
//! Both shapes run the gateway, the bus relay, and the heartbeat task.

pub mod app;
pub mod config;
pub mod error;

pub use app::{ingest_loop, Application};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
