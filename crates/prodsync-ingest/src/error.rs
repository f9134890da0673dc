//! Error types for ingestion runs
//!
//! Only failures that must stop a run surface as [`IngestError`]. Transient
//! transport failures are absorbed by the fetcher, and per-item problems end
//! up in the quarantine store.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to acquire store lock: {0}")]
    Lock(String),

    #[error("Downstream sink rejected item: {0}")]
    Sink(String),
}

impl IngestError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a sink error
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }
}

impl From<prodsync_common::CommonError> for IngestError {
    fn from(err: prodsync_common::CommonError) -> Self {
        IngestError::Config(err.to_string())
    }
}
