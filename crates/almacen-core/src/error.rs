//! Error types for the document store and document sources.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document '{0}' is system-owned and cannot be removed")]
    SystemOwned(String),

    #[error("document not found: {0}")]
    NotFound(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid source url: {0}")]
    InvalidUrl(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("HTTP error: {0}")]
    HttpStatus(u16),

    #[error("invalid document payload: {0}")]
    InvalidFormat(String),

    #[error("no document source configured")]
    NoSources,

    #[error(transparent)]
    Store(#[from] StoreError),
}
