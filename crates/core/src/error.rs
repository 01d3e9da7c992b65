//! Error types for the span model and query layer

use thiserror::Error;

/// Errors raised while constructing spans, trace identifiers or queries.
///
/// All of these are caller errors: they are detected synchronously, before
/// any store I/O is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Trace or span identifier is not valid lower-hex of the right width
    #[error("invalid trace id: {0}")]
    InvalidTraceId(String),

    /// Span is missing a required field
    #[error("invalid span: {0}")]
    InvalidSpan(String),

    /// Query request failed validation
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Bucket range is inverted
    #[error("start bucket ({start}) > end bucket ({end})")]
    InvertedBuckets {
        /// First bucket of the requested range
        start: i64,
        /// Last bucket of the requested range
        end: i64,
    },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
