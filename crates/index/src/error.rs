//! Error types for write-path caches

use thiserror::Error;

/// Rejected cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Expiration must be positive
    #[error("expire_after must be positive, was {0:?}")]
    NonPositiveExpiration(std::time::Duration),

    /// Size bound must be positive
    #[error("{name} must be positive")]
    ZeroBound {
        /// Setting that was zero
        name: &'static str,
    },
}

/// Result type for cache construction
pub type Result<T> = std::result::Result<T, Error>;
