//! Handle for a pooled query.
//!
//! [`Coordinator::query`](crate::Coordinator::query) returns a
//! [`QueryHandle`] before any connection has been acquired. The handle moves
//! through three states:
//!
//! ```text
//! Pending ──acquire ok──> Bound { connection_id } ──terminal──> Completed | Failed
//!    │
//!    └──acquire failed──────────────────────────────────────> Failed
//! ```
//!
//! Awaiting the handle yields the query's result. A handle that is dropped
//! or [detached](QueryHandle::detach) no longer listens; a failure it would
//! have received goes to the coordinator's observers instead.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{oneshot, watch};

use crate::adapter::Query;
use crate::error::{Error, Result};

/// Where a query is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Waiting for a connection.
    Pending,
    /// Running on a borrowed connection.
    Bound {
        /// Pool-assigned connection identifier.
        connection_id: u64,
    },
    /// Finished successfully; the connection has been handed back.
    Completed,
    /// Failed to acquire a connection or to execute.
    Failed,
}

impl QueryState {
    /// Whether the query reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A query submitted to the coordinator.
///
/// Resolves to the adapter's output once the query ran and its connection
/// went back to the pool.
#[must_use = "dropping a QueryHandle routes failures to the coordinator's observers; call `detach` to make that explicit"]
pub struct QueryHandle<O> {
    query: Query,
    state: watch::Receiver<QueryState>,
    result: oneshot::Receiver<Result<O>>,
}

impl<O> QueryHandle<O> {
    pub(crate) fn pending(query: Query) -> (Self, Completion<O>) {
        let (state_tx, state_rx) = watch::channel(QueryState::Pending);
        let (result_tx, result_rx) = oneshot::channel();
        (
            Self {
                query,
                state: state_rx,
                result: result_rx,
            },
            Completion {
                state: state_tx,
                result: result_tx,
            },
        )
    }

    /// The query object built by the adapter.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> QueryState {
        *self.state.borrow()
    }

    /// Wait until the query leaves [`QueryState::Pending`].
    pub async fn wait_bound(&mut self) -> QueryState {
        let left_pending = self
            .state
            .wait_for(|state| *state != QueryState::Pending)
            .await
            .map(|state| *state);
        // The producer is gone; report whatever it published last.
        left_pending.unwrap_or_else(|_| *self.state.borrow())
    }

    /// Stop listening for the result.
    ///
    /// The query still runs and its connection is still released; failures
    /// are reported to the coordinator's observers.
    pub fn detach(self) {}

    /// Run `callback` with the result once the query finishes.
    pub fn on_complete<F>(self, callback: F)
    where
        O: Send + 'static,
        F: FnOnce(Result<O>) + Send + 'static,
    {
        tokio::spawn(async move { callback(self.await) });
    }
}

impl<O> Future for QueryHandle<O> {
    type Output = Result<O>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().result)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Abandoned)))
    }
}

impl<O> std::fmt::Debug for QueryHandle<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("statement", &self.query.statement())
            .field("state", &self.state())
            .finish()
    }
}

/// Producer side of a [`QueryHandle`], owned by the task running the query.
pub(crate) struct Completion<O> {
    state: watch::Sender<QueryState>,
    result: oneshot::Sender<Result<O>>,
}

impl<O> Completion<O> {
    pub(crate) fn bind(&self, connection_id: u64) {
        self.state.send_replace(QueryState::Bound { connection_id });
    }

    /// Deliver the terminal outcome.
    ///
    /// Returns the error when it could not be delivered because the handle
    /// is gone.
    pub(crate) fn finish(self, result: Result<O>) -> Option<Error> {
        let state = if result.is_ok() {
            QueryState::Completed
        } else {
            QueryState::Failed
        };
        self.state.send_replace(state);
        match self.result.send(result) {
            Ok(()) | Err(Ok(_)) => None,
            Err(Err(error)) => Some(error),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn handle() -> (QueryHandle<u32>, Completion<u32>) {
        QueryHandle::pending(Query::new("SELECT 1", ()))
    }

    #[test]
    fn test_pending_until_finished() {
        let (handle, completion) = handle();
        assert_eq!(handle.state(), QueryState::Pending);

        let mut fut = task::spawn(handle);
        assert_pending!(fut.poll());

        completion.bind(7);
        assert_pending!(fut.poll());

        assert!(completion.finish(Ok(1)).is_none());
        assert!(fut.is_woken());
        assert_ready_eq!(fut.poll(), Ok(1));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (mut handle, completion) = handle();

        completion.bind(3);
        assert_eq!(handle.wait_bound().await, QueryState::Bound { connection_id: 3 });

        completion.finish(Ok(5));
        assert_eq!(handle.state(), QueryState::Completed);
        assert!(handle.state().is_terminal());
        assert_eq!(handle.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_failure_returned_when_handle_dropped() {
        let (handle, completion) = handle();
        handle.detach();

        let undelivered = completion.finish(Err(PoolError::PoolClosed.into()));
        assert_eq!(undelivered, Some(Error::Pool(PoolError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_success_not_reported_when_handle_dropped() {
        let (handle, completion) = handle();
        drop(handle);

        assert!(completion.finish(Ok(1)).is_none());
    }

    #[tokio::test]
    async fn test_abandoned_when_producer_dropped() {
        let (handle, completion) = handle();
        drop(completion);

        assert_eq!(handle.await.unwrap_err(), Error::Abandoned);
    }

    #[tokio::test]
    async fn test_on_complete_receives_result() {
        let (handle, completion) = handle();
        let (tx, rx) = oneshot::channel();

        handle.on_complete(move |result| {
            let _ = tx.send(result);
        });
        completion.finish(Ok(9));

        assert_eq!(rx.await.unwrap(), Ok(9));
    }
}
