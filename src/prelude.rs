//! Convenient imports for Tracestore.
//!
//! This module re-exports the most commonly used types so you can get started
//! with a single import:
//!
//! ```ignore
//! use tracestore::prelude::*;
//!
//! let storage = TraceStorage::in_memory()?;
//! storage.accept(spans).await?;
//! ```

// Main entry point
pub use crate::storage::{TraceStorage, TraceStorageBuilder};

// Error handling
pub use crate::error::{Error, Result};

// Model
pub use tracestore_core::{Annotation, Endpoint, Kind, QueryRequest, Span, TraceId};

// Configuration and results
pub use tracestore_engine::{AcceptSummary, StorageConfig};

// Storage variants and their cancelable calls
pub use tracestore_engine::{Call, CancelHandle, SpanStorage};

// Store boundary
pub use tracestore_storage::{MemoryStore, StoreClient};
