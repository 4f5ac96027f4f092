//! Pooled transactions.
//!
//! A [`Transaction`] holds one borrowed connection from the moment it is
//! acquired until commit or rollback. Statements issued through the handle
//! run on that connection in order. The connection is handed back exactly
//! once, on the first terminal step:
//!
//! | Terminal step | Connection |
//! |---------------|------------|
//! | commit / rollback succeeded | released through the reset chain |
//! | commit / rollback statement failed | destroyed |
//! | handle dropped while active | rolled back, then released |
//! | begin statement failed | released through the reset chain |
//!
//! Terminal requests that arrive after the first one are refused with
//! [`Error::TransactionClosed`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::adapter::{Adapter, Connection, Params, Query, TransactionDialect};
use crate::coordinator::{Coordinator, QueryOutput};
use crate::error::{Error, Result};
use crate::pool::PooledConnection;

/// Where a transaction is in its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    /// Waiting for a connection.
    Pending,
    /// Begin statement ran; statements can be issued.
    Active {
        /// Pool-assigned connection identifier.
        connection_id: u64,
    },
    /// Committed; the connection has been handed back.
    Committed,
    /// Rolled back; the connection has been handed back.
    RolledBack,
    /// Could not acquire, begin, commit or roll back.
    Failed(Error),
}

impl TransactionState {
    /// Whether the transaction reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed(_))
    }
}

pub(crate) enum Command<O> {
    Query {
        query: Query,
        reply: oneshot::Sender<Result<O>>,
    },
    Commit {
        reply: oneshot::Sender<Result<()>>,
    },
    Rollback {
        reply: oneshot::Sender<Result<()>>,
    },
}

impl<O> Command<O> {
    /// Answer a request that arrived after the terminal step.
    fn reject(self, error: Error) {
        // The requester may have given up; nothing to do then.
        match self {
            Self::Query { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::Commit { reply } | Self::Rollback { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// A transaction bound to one pooled connection.
#[must_use = "dropping an active Transaction rolls it back"]
pub struct Transaction<A: Adapter> {
    adapter: Arc<A>,
    commands: mpsc::UnboundedSender<Command<QueryOutput<A>>>,
    state: watch::Receiver<TransactionState>,
}

impl<A: Adapter> Transaction<A> {
    pub(crate) fn new(
        adapter: Arc<A>,
        commands: mpsc::UnboundedSender<Command<QueryOutput<A>>>,
        state: watch::Receiver<TransactionState>,
    ) -> Self {
        Self {
            adapter,
            commands,
            state,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state.borrow().clone()
    }

    /// Wait until a connection is bound and the begin statement ran.
    ///
    /// Returns the connection id, or the error that ended the transaction.
    pub async fn wait_active(&mut self) -> Result<u64> {
        let settled = self
            .state
            .wait_for(|state| *state != TransactionState::Pending)
            .await
            .map(|state| state.clone());
        match settled.unwrap_or_else(|_| self.state.borrow().clone()) {
            TransactionState::Active { connection_id } => Ok(connection_id),
            TransactionState::Failed(error) => Err(error),
            TransactionState::Pending => Err(Error::Abandoned),
            TransactionState::Committed | TransactionState::RolledBack => {
                Err(Error::TransactionClosed)
            }
        }
    }

    /// Run a statement inside the transaction.
    ///
    /// A failing statement leaves the transaction open; the caller decides
    /// whether to roll back.
    pub async fn query(
        &self,
        statement: &str,
        params: impl Into<Params>,
    ) -> Result<QueryOutput<A>> {
        let query = self.adapter.create_query(statement, params.into());
        let (reply, response) = oneshot::channel();
        self.send(Command::Query { query, reply })?;
        response.await.unwrap_or_else(|_| Err(self.closed_error()))
    }

    /// Commit and hand the connection back.
    pub async fn commit(self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Commit { reply })?;
        response.await.unwrap_or_else(|_| Err(self.closed_error()))
    }

    /// Roll back and hand the connection back.
    pub async fn rollback(self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Rollback { reply })?;
        response.await.unwrap_or_else(|_| Err(self.closed_error()))
    }

    fn send(&self, command: Command<QueryOutput<A>>) -> Result<()> {
        self.commands.send(command).map_err(|_| self.closed_error())
    }

    /// The error for a request the driving task can no longer serve.
    fn closed_error(&self) -> Error {
        match &*self.state.borrow() {
            TransactionState::Failed(error) => error.clone(),
            TransactionState::Committed | TransactionState::RolledBack => Error::TransactionClosed,
            TransactionState::Pending | TransactionState::Active { .. } => Error::Abandoned,
        }
    }
}

impl<A: Adapter> std::fmt::Debug for Transaction<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("adapter", &self.adapter.name())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// The transaction's connection, handed back at most once.
struct ConnectionSlot<C> {
    conn: Option<PooledConnection<C>>,
}

impl<C: Connection> ConnectionSlot<C> {
    fn new(conn: PooledConnection<C>) -> Self {
        Self { conn: Some(conn) }
    }

    async fn execute(&mut self, query: &Query) -> Result<C::Output> {
        match self.conn.as_mut() {
            Some(conn) => Ok(conn.execute(query).await?),
            None => Err(Error::TransactionClosed),
        }
    }

    /// Take the connection for its single hand-back.
    fn take(&mut self) -> Option<PooledConnection<C>> {
        self.conn.take()
    }

    fn is_settled(&self) -> bool {
        self.conn.is_none()
    }
}

/// Drive one transaction: acquire, begin, serve statements, finish.
pub(crate) async fn drive<A: Adapter>(
    coordinator: Coordinator<A>,
    dialect: TransactionDialect,
    mut commands: mpsc::UnboundedReceiver<Command<QueryOutput<A>>>,
    state: watch::Sender<TransactionState>,
) {
    let conn = match coordinator.acquire().await {
        Ok(conn) => conn,
        Err(error) => {
            state.send_replace(TransactionState::Failed(error.clone()));
            if state.is_closed() {
                coordinator.fault(&error);
            }
            return;
        }
    };

    if state.is_closed() {
        tracing::debug!(
            connection_id = conn.id(),
            "transaction dropped before begin, releasing"
        );
        coordinator.release(conn).await;
        return;
    }

    let connection_id = conn.id();
    let mut slot = ConnectionSlot::new(conn);

    let begin = Query::new(Arc::clone(&dialect.begin), ());
    if let Err(error) = slot.execute(&begin).await {
        tracing::debug!(connection_id, %error, "begin failed");
        state.send_replace(TransactionState::Failed(error.clone()));
        if let Some(conn) = slot.take() {
            coordinator.release(conn).await;
        }
        if state.is_closed() {
            coordinator.fault(&error);
        }
        return;
    }
    state.send_replace(TransactionState::Active { connection_id });
    tracing::debug!(connection_id, "transaction active");

    while let Some(command) = commands.recv().await {
        match command {
            Command::Query { query, reply } => {
                let result = slot.execute(&query).await;
                if let Err(Err(error)) = reply.send(result) {
                    coordinator.fault(&error);
                }
            }
            Command::Commit { reply } => {
                let result = finish(
                    &coordinator,
                    &mut slot,
                    &dialect.commit,
                    TransactionState::Committed,
                    &state,
                )
                .await;
                let _ = reply.send(result);
            }
            Command::Rollback { reply } => {
                let result = finish(
                    &coordinator,
                    &mut slot,
                    &dialect.rollback,
                    TransactionState::RolledBack,
                    &state,
                )
                .await;
                let _ = reply.send(result);
            }
        }
        if slot.is_settled() {
            break;
        }
    }

    if !slot.is_settled() {
        tracing::debug!(connection_id, "transaction handle dropped, rolling back");
        if let Err(error) = finish(
            &coordinator,
            &mut slot,
            &dialect.rollback,
            TransactionState::RolledBack,
            &state,
        )
        .await
        {
            coordinator.fault(&error);
        }
    }

    commands.close();
    while let Ok(command) = commands.try_recv() {
        command.reject(Error::TransactionClosed);
    }
}

/// Run a terminal statement and hand the connection back exactly once.
async fn finish<A: Adapter>(
    coordinator: &Coordinator<A>,
    slot: &mut ConnectionSlot<A::Connection>,
    statement: &Arc<str>,
    terminal: TransactionState,
    state: &watch::Sender<TransactionState>,
) -> Result<()> {
    let result = slot.execute(&Query::new(Arc::clone(statement), ())).await;
    let Some(conn) = slot.take() else {
        return Err(Error::TransactionClosed);
    };

    match result {
        Ok(_) => {
            state.send_replace(terminal);
            coordinator.release(conn).await;
            Ok(())
        }
        Err(error) => {
            tracing::warn!(
                connection_id = conn.id(),
                %error,
                "terminal transaction statement failed, destroying connection"
            );
            state.send_replace(TransactionState::Failed(error.clone()));
            coordinator.destroy(conn).await;
            Err(error)
        }
    }
}
