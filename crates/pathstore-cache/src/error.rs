//! Error types for the pathstore cache backend.

use thiserror::Error;

/// Result type alias for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while talking to the persistent backend.
///
/// These never reach `CacheAdapter` callers: the adapter logs them and
/// degrades to `None`/`false`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("path error: {0}")]
    Path(#[from] pathstore_core::PathError),
}
