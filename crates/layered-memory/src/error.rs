//! Exhaustive error taxonomy for the memory engine.
//!
//! Lower layers (SQLite, the HNSW index, HTTP capability clients) return
//! `anyhow::Result`; component boundaries map those into a `MemoryError`
//! variant so callers can branch on kind instead of parsing messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("filter type error: {0}")]
    FilterTypeError(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// Whether a component-internal retry loop should attempt this error again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemoryError::Transient(_))
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        MemoryError::Internal(err.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        MemoryError::Transient(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        MemoryError::ValidationError(msg.into())
    }
}

/// Maps an opaque lower-layer error into a `Transient` unless the caller
/// already knows it should be `Internal` (programmer/invariant bug).
pub fn from_anyhow_transient(err: anyhow::Error) -> MemoryError {
    MemoryError::Transient(err.to_string())
}
