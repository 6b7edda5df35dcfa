//! Core error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
