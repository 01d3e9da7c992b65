//! Wide-column store boundary for span storage
//!
//! This crate provides:
//! - [`StoreClient`]: the paged read / single write capability the indexing
//!   layer is written against
//! - [`ReadStatement`] and [`Mutation`]: one variant per prepared statement
//! - [`MemoryStore`]: a DashMap-backed store with the same partition and
//!   clustering semantics, used for embedding and tests
//!
//! Reads accept a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! through [`for_each_row`] so that abandoning a query stops paging.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod memory;
pub mod statement;

pub use client::{for_each_row, read_all, StoreClient};
pub use error::{Result, StoreError};
pub use memory::{MemoryStore, WideTable, DEFAULT_PAGE_SIZE};
pub use statement::{
    DurationRange, Mutation, Page, PagingState, ReadStatement, Row, Table, TimeRange,
};
