//! Gateway error types.

use thiserror::Error;

/// Errors surfaced by the client gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The client's outbound buffer is full or its writer task is gone.
    #[error("Client {0} unreachable")]
    ClientUnreachable(String),

    /// Operation referenced a client id that is not registered.
    #[error("Client {0} not registered")]
    ClientNotFound(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Listener bind or serve failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
