//! Prometheus metrics and structured logging for tickflow.
//!
//! - Prometheus metrics for connection state, frame volume, bus traffic,
//!   and gateway delivery
//! - Structured JSON logging with tracing

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{export, Metrics};
