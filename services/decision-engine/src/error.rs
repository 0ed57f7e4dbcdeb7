//! Engine error types

use thiserror::Error;

/// Errors that escape the decision pipeline
#[derive(Debug, Error)]
pub enum EngineError {
    /// Payload matches neither the scanner nor the full alert shape
    #[error("unrecognized payload: {0}")]
    UnrecognizedPayload(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<config::ConfigError> for EngineError {
    fn from(e: config::ConfigError) -> Self {
        EngineError::Config(e.to_string())
    }
}

/// Idempotency / counter store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation failed: {0}")]
    Operation(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
