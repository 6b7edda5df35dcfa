//! Bus error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus not configured")]
    NotConfigured,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type BusResult<T> = Result<T, BusError>;
