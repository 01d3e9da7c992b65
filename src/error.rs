//! Unified error types for Tracestore.
//!
//! This module provides a clean error type that wraps the errors of the
//! member crates and presents a consistent interface to the API boundary.

use thiserror::Error;
use tracestore_storage::StoreError;

/// All Tracestore errors.
///
/// This is the canonical error type of the facade. "No matching traces" is
/// never an error; it is an empty success.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected span, query, trace id or configuration
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The store could not be reached or timed out; worth retrying
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a statement or returned malformed rows
    #[error("storage error: {0}")]
    Storage(String),

    /// The operation was cancelled before or while it ran
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for Tracestore operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable.
    ///
    /// Only store availability failures may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }

    /// Check if the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Check if the caller's input was rejected.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }
}

// Convert from store client errors
impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Cancelled => Error::Cancelled,
            e if e.is_retryable() => Error::Unavailable(e.to_string()),
            e => Error::Storage(e.to_string()),
        }
    }
}

// Convert from engine errors
impl From<tracestore_engine::Error> for Error {
    fn from(e: tracestore_engine::Error) -> Self {
        use tracestore_engine::Error as EngineError;
        match e {
            EngineError::Store(store) => store.into(),
            EngineError::InvalidArgument(core) => Error::InvalidArgument(core.to_string()),
            EngineError::Config(msg) => Error::InvalidArgument(format!("configuration: {}", msg)),
            EngineError::Cancelled => Error::Cancelled,
        }
    }
}

// Convert from model validation errors
impl From<tracestore_core::Error> for Error {
    fn from(e: tracestore_core::Error) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}
