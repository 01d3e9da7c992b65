//! Store client boundary
//!
//! The indexing layer depends on exactly two capabilities of the underlying
//! wide-column store: a paged read of one prepared statement, and a write of
//! one prepared mutation. Retries, timeouts and connection pooling belong
//! to the implementation behind this trait.

use crate::error::{Result, StoreError};
use crate::statement::{Mutation, Page, PagingState, ReadStatement, Row};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Asynchronous client for a wide-column store
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Read one page of a statement, continuing from `paging_state` when set
    async fn read(
        &self,
        statement: &ReadStatement,
        paging_state: Option<PagingState>,
    ) -> Result<Page>;

    /// Apply one mutation
    async fn write(&self, mutation: &Mutation) -> Result<()>;
}

/// Read every page of a statement, feeding rows to `sink` in store order.
///
/// Each page request is a suspension point that observes `cancel`: a token
/// cancelled before the first page fails fast, and cancellation while a
/// page is in flight abandons it.
pub async fn for_each_row<F>(
    client: &dyn StoreClient,
    statement: &ReadStatement,
    cancel: &CancellationToken,
    mut sink: F,
) -> Result<usize>
where
    F: FnMut(Row) -> Result<()>,
{
    let mut paging_state: Option<PagingState> = None;
    let mut pages = 0usize;
    loop {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            page = client.read(statement, paging_state.take()) => page?,
        };
        pages += 1;
        for row in page.rows {
            sink(row)?;
        }
        match page.paging_state {
            Some(next) => paging_state = Some(next),
            None => return Ok(pages),
        }
    }
}

/// Read every page of a statement into a list
pub async fn read_all(
    client: &dyn StoreClient,
    statement: &ReadStatement,
    cancel: &CancellationToken,
) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for_each_row(client, statement, cancel, |row| {
        rows.push(row);
        Ok(())
    })
    .await?;
    Ok(rows)
}
