//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tickflow_ws::WsError>),

    #[error("Feed error: {0}")]
    Feed(#[from] tickflow_feed::FeedError),

    #[error("Bus error: {0}")]
    Bus(#[from] tickflow_bus::BusError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] tickflow_gateway::GatewayError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tickflow_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
