//! Error types for the span storage engine

use thiserror::Error;
use tracestore_storage::StoreError;

/// Failures of engine operations
#[derive(Debug, Error)]
pub enum Error {
    /// A store read failed; write failures are logged, never returned
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Rejected span, query or trace id
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] tracestore_core::Error),

    /// Rejected configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The call was cancelled before or while it ran
    #[error("call cancelled")]
    Cancelled,
}

impl Error {
    /// Check if the operation was cancelled, directly or in a sub-read
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Store(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Failures worth retrying at the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_retryable())
    }

    /// Failures caused by caller input
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_) | Error::Config(_))
    }
}

impl From<tracestore_index::Error> for Error {
    fn from(e: tracestore_index::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
