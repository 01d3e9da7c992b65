//! Store client errors

use crate::statement::Table;
use thiserror::Error;

/// Failures reported by a store client.
///
/// Timeouts are reported like any other failure; callers must not treat
/// them as an empty result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The table could not be reached (connection loss, node down)
    #[error("{table} unavailable: {message}")]
    Unavailable {
        /// Table the statement targeted
        table: Table,
        /// Driver message
        message: String,
    },

    /// The store did not answer in time
    #[error("{table} timed out after {millis}ms")]
    Timeout {
        /// Table the statement targeted
        table: Table,
        /// Elapsed time before giving up
        millis: u64,
    },

    /// The statement was rejected, for example an unsupported predicate
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// A row did not have the shape the statement promised
    #[error("unexpected row: expected {expected}, got {actual}")]
    UnexpectedRow {
        /// Row shape the caller asked for
        expected: &'static str,
        /// Row shape the store returned
        actual: &'static str,
    },

    /// The operation was cancelled before or while it ran
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Failures that may succeed when retried by the client
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. } | StoreError::Timeout { .. })
    }

    /// Check if this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
