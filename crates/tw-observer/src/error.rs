//! Error types for the observer service.

use thiserror::Error;

/// Failure loading or saving a persisted state blob.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a host oracle call (cookie enumeration, window lookup,
/// history search). These degrade to "no classification" for the affected
/// detector and never reach the gate path.
#[derive(Debug, Error)]
#[error("host oracle error: {message}")]
pub struct OracleError {
    pub message: String,
}

impl OracleError {
    pub fn new(message: impl Into<String>) -> Self {
        OracleError {
            message: message.into(),
        }
    }
}
