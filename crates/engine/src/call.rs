//! One-shot cancelable operations
//!
//! Every storage entry point returns a [`Call`]. Nothing runs until the call
//! is executed, and a call cancelled before that fails fast with
//! [`Error::Cancelled`] instead of silently doing nothing. Cancelling a
//! running call propagates to every sub-read through the shared
//! [`CancellationToken`].
//!
//! Write calls are built with [`Call::committing`]: cancellation is only
//! honoured before they start, so a started write batch is never cut short
//! after its index rows were recorded as written.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use std::future::{Future, IntoFuture};
use tokio_util::sync::CancellationToken;

/// A pending storage operation producing `T`
#[must_use = "calls do nothing unless executed"]
pub struct Call<T> {
    cancel: CancellationToken,
    committing: bool,
    future: BoxFuture<'static, Result<T>>,
}

/// Cancels a [`Call`] from elsewhere
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    /// Cancel the call and its in-flight sub-reads
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

impl<T: Send + 'static> Call<T> {
    /// Build a call from a future factory receiving the call's token
    pub fn new<F, Fut>(make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let future = Box::pin(make(cancel.clone()));
        Self {
            cancel,
            committing: false,
            future,
        }
    }

    /// Build a call that runs to completion once started
    pub fn committing<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            cancel: CancellationToken::new(),
            committing: true,
            future: Box::pin(future),
        }
    }

    /// A call that yields `value`
    pub fn ready(value: T) -> Self {
        Self::new(|_| async move { Ok(value) })
    }

    /// A call that fails with `error`
    pub fn failed(error: Error) -> Self {
        Self::new(|_| async move { Err(error) })
    }

    /// Handle for cancelling this call
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Cancel this call
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Transform the result of a successful call
    pub fn map<U, F>(self, f: F) -> Call<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let Call {
            cancel,
            committing,
            future,
        } = self;
        Call {
            cancel,
            committing,
            future: Box::pin(async move { future.await.map(f) }),
        }
    }

    /// Run the call to completion
    pub async fn execute(self) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Call {
            cancel,
            committing,
            future,
        } = self;
        if committing {
            return future.await;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = future => result,
        }
    }
}

impl<T: Send + 'static> IntoFuture for Call<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

impl<T> std::fmt::Debug for Call<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("committing", &self.committing)
            .finish()
    }
}
