//! The pool coordinator.
//!
//! [`Coordinator`] binds query and transaction execution to the
//! borrow/return protocol of a [`ResourcePool`]. Every connection it lends
//! out comes back exactly once: through the reset chain into the pool, or
//! torn down when the reset chain fails.
//!
//! ## Example
//!
//! ```rust,ignore
//! use conn_coordinator::Coordinator;
//! use std::time::Duration;
//!
//! let coordinator = Coordinator::builder(MyAdapter::new(), params)
//!     .min_connections(2)
//!     .max_connections(20)
//!     .connection_timeout(Duration::from_secs(5))
//!     .build()
//!     .await?;
//!
//! let rows = coordinator.query("SELECT * FROM users WHERE id = $1", [42]).await?;
//!
//! let tx = coordinator.begin()?;
//! tx.query("UPDATE accounts SET balance = balance - 10 WHERE id = $1", [1]).await?;
//! tx.commit().await?;
//!
//! coordinator.close().await;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::adapter::{Adapter, ConnectHook, Connection, Params, Query};
use crate::config::PoolConfig;
use crate::error::{Error, PoolError, Result};
use crate::event::{Observers, PoolEvent, PoolObserver};
use crate::instrumentation::{extract_operation, span_names};
use crate::pool::{BoundedPool, ManageConnection, PoolStatus, PooledConnection, ResourcePool};
use crate::query::{Completion, QueryHandle};
use crate::reset::{ResetChain, ResetStep};
use crate::transaction::{self, Transaction, TransactionState};

/// Output of a statement run through adapter `A`.
pub type QueryOutput<A> = <<A as Adapter>::Connection as Connection>::Output;

/// Hooks, observers and pool settings for a [`Coordinator`].
pub struct CoordinatorOptions<C> {
    pool: PoolConfig,
    on_connect: Option<Arc<dyn ConnectHook<C>>>,
    reset: Option<Arc<dyn ResetStep<C>>>,
    observers: Vec<Arc<dyn PoolObserver>>,
}

impl<C> CoordinatorOptions<C> {
    /// Default options: default pool settings, no hooks, no observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: PoolConfig::default(),
            on_connect: None,
            reset: None,
            observers: Vec::new(),
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.pool = config;
        self
    }

    /// Run `hook` on every new connection before it enters the pool.
    #[must_use]
    pub fn on_connect(mut self, hook: impl ConnectHook<C> + 'static) -> Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Caller reset step, run before the adapter's own reset.
    #[must_use]
    pub fn reset(mut self, step: impl ResetStep<C> + 'static) -> Self {
        self.reset = Some(Arc::new(step));
        self
    }

    /// Register an event observer.
    #[must_use]
    pub fn observer<O: PoolObserver + 'static>(mut self, observer: Arc<O>) -> Self {
        self.observers.push(observer);
        self
    }

    /// The pool configuration.
    #[must_use]
    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }
}

impl<C> Default for CoordinatorOptions<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for CoordinatorOptions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorOptions")
            .field("pool", &self.pool)
            .field("on_connect", &self.on_connect.is_some())
            .field("reset", &self.reset.is_some())
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Connection create/destroy callbacks backed by an [`Adapter`].
///
/// Creation runs [`Adapter::connect`] and then the optional
/// [`ConnectHook`]; a connection whose hook fails is closed and reported
/// as [`PoolError::ConnectionCreation`]. Destruction runs
/// [`Connection::close`].
pub struct AdapterManager<A: Adapter> {
    adapter: Arc<A>,
    params: A::Params,
    on_connect: Option<Arc<dyn ConnectHook<A::Connection>>>,
}

impl<A: Adapter> AdapterManager<A> {
    /// Create a manager for `adapter` connecting with `params`.
    pub fn new(adapter: Arc<A>, params: A::Params) -> Self {
        Self {
            adapter,
            params,
            on_connect: None,
        }
    }

    /// Run `hook` on every new connection.
    #[must_use]
    pub fn with_on_connect(mut self, hook: Arc<dyn ConnectHook<A::Connection>>) -> Self {
        self.on_connect = Some(hook);
        self
    }
}

#[async_trait::async_trait]
impl<A: Adapter> ManageConnection for AdapterManager<A> {
    type Connection = A::Connection;

    async fn create(&self) -> std::result::Result<A::Connection, PoolError> {
        let mut conn = self
            .adapter
            .connect(&self.params)
            .await
            .map_err(|e| PoolError::ConnectionCreation(e.to_string()))?;

        if let Some(hook) = &self.on_connect {
            if let Err(e) = hook.on_connect(&mut conn).await {
                conn.close().await;
                return Err(PoolError::ConnectionCreation(format!(
                    "on_connect hook failed: {e}"
                )));
            }
        }

        tracing::debug!(adapter = self.adapter.name(), "connection created");
        Ok(conn)
    }

    async fn destroy(&self, conn: A::Connection) {
        conn.close().await;
        tracing::debug!(adapter = self.adapter.name(), "connection closed");
    }
}

struct Inner<A: Adapter> {
    adapter: Arc<A>,
    pool: Arc<dyn ResourcePool<Connection = A::Connection>>,
    reset: ResetChain<A::Connection>,
    observers: Observers,
}

/// Coordinates borrowing, using and returning pooled connections.
///
/// Cheap to clone; clones share the same pool.
pub struct Coordinator<A: Adapter> {
    inner: Arc<Inner<A>>,
}

impl<A: Adapter> Clone for Coordinator<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Adapter> Coordinator<A> {
    /// Create a coordinator over a [`BoundedPool`] of adapter connections.
    ///
    /// The pool starts empty; use [`Coordinator::builder`] to pre-create
    /// `min_connections`.
    pub fn new(
        adapter: A,
        params: A::Params,
        options: CoordinatorOptions<A::Connection>,
    ) -> std::result::Result<Self, PoolError> {
        let (adapter, pool) = Self::bounded_pool(adapter, params, &options)?;
        Ok(Self::assemble(adapter, Arc::new(pool), options))
    }

    /// Create a coordinator over a caller-supplied pool.
    ///
    /// The pool owns connection creation, so the pool settings and the
    /// `on_connect` hook in `options` are not used; build the pool with an
    /// [`AdapterManager`] to get them.
    pub fn with_pool<P>(
        adapter: Arc<A>,
        pool: P,
        options: CoordinatorOptions<A::Connection>,
    ) -> Self
    where
        P: ResourcePool<Connection = A::Connection>,
    {
        Self::assemble(adapter, Arc::new(pool), options)
    }

    /// Start building a coordinator.
    pub fn builder(adapter: A, params: A::Params) -> CoordinatorBuilder<A> {
        CoordinatorBuilder {
            adapter,
            params,
            options: CoordinatorOptions::new(),
        }
    }

    fn bounded_pool(
        adapter: A,
        params: A::Params,
        options: &CoordinatorOptions<A::Connection>,
    ) -> std::result::Result<(Arc<A>, BoundedPool<AdapterManager<A>>), PoolError> {
        let adapter = Arc::new(adapter);
        let mut manager = AdapterManager::new(Arc::clone(&adapter), params);
        if let Some(hook) = &options.on_connect {
            manager = manager.with_on_connect(Arc::clone(hook));
        }
        let pool = BoundedPool::new(manager, options.pool.clone())?;
        Ok((adapter, pool))
    }

    fn assemble(
        adapter: Arc<A>,
        pool: Arc<dyn ResourcePool<Connection = A::Connection>>,
        options: CoordinatorOptions<A::Connection>,
    ) -> Self {
        let reset = ResetChain::new(adapter.reset_step(), options.reset);
        tracing::debug!(
            adapter = adapter.name(),
            reset_steps = reset.len(),
            observers = options.observers.len(),
            "coordinator created"
        );
        Self {
            inner: Arc::new(Inner {
                adapter,
                pool,
                reset,
                observers: Observers::new(options.observers),
            }),
        }
    }

    /// Name of the adapter.
    #[must_use]
    pub fn adapter(&self) -> &str {
        self.inner.adapter.name()
    }

    /// Current pool counts.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    /// Borrow a connection from the pool.
    ///
    /// Every borrowed connection must be handed back with
    /// [`release`](Self::release) or [`destroy`](Self::destroy).
    pub async fn acquire(&self) -> Result<PooledConnection<A::Connection>> {
        self.inner.observers.emit(PoolEvent::Acquire);
        Ok(self.inner.pool.acquire().await?)
    }

    /// Hand a connection back.
    ///
    /// Runs the reset chain; the connection returns to the pool if every
    /// step succeeds and is torn down otherwise. Reset failures are logged,
    /// not returned.
    pub async fn release(&self, mut conn: PooledConnection<A::Connection>) {
        let connection_id = conn.id();
        let span = tracing::debug_span!(span_names::RELEASE, connection_id);

        async move {
            self.inner
                .observers
                .emit(PoolEvent::Release { connection_id });
            conn.metadata_mut().mark_resetting();

            match self.inner.reset.run(&mut conn).await {
                Ok(()) => self.inner.pool.release(conn),
                Err(error) => {
                    tracing::warn!(%error, "reset failed, destroying connection");
                    self.inner.pool.destroy(conn).await;
                }
            }
        }
        .instrument(span)
        .await;
    }

    /// Tear a connection down without resetting it.
    pub async fn destroy(&self, conn: PooledConnection<A::Connection>) {
        tracing::debug!(connection_id = conn.id(), "destroying connection");
        self.inner.pool.destroy(conn).await;
    }

    /// Run a statement on a pooled connection.
    ///
    /// Returns immediately with a [`QueryHandle`] in the `Pending` state.
    /// The query runs on a spawned task whether or not the handle is
    /// awaited; its connection is released before the handle resolves.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn query(
        &self,
        statement: &str,
        params: impl Into<Params>,
    ) -> QueryHandle<QueryOutput<A>> {
        let query = self.inner.adapter.create_query(statement, params.into());
        let (handle, completion) = QueryHandle::pending(query.clone());

        let span = tracing::debug_span!(
            span_names::QUERY,
            adapter = self.adapter(),
            operation = extract_operation(query.statement())
        );
        tokio::spawn(self.clone().run_query(query, completion).instrument(span));
        handle
    }

    async fn run_query(self, query: Query, completion: Completion<QueryOutput<A>>) {
        let mut conn = match self.acquire().await {
            Ok(conn) => conn,
            Err(error) => {
                tracing::debug!(%error, "acquire failed");
                if let Some(error) = completion.finish(Err(error)) {
                    self.fault(&error);
                }
                return;
            }
        };

        let connection_id = conn.id();
        completion.bind(connection_id);
        self.inner.observers.emit(PoolEvent::Query {
            statement: query.statement(),
            connection_id,
        });

        let result = conn.execute(&query).await.map_err(Error::from);
        self.release(conn).await;

        if let Some(error) = completion.finish(result) {
            self.fault(&error);
        }
    }

    /// Start a transaction with the adapter's begin statement.
    ///
    /// Fails immediately if the adapter has no transaction support.
    /// Must be called from within a Tokio runtime.
    pub fn begin(&self) -> Result<Transaction<A>> {
        self.start_transaction(None)
    }

    /// Start a transaction with a custom begin statement.
    pub fn begin_with(&self, statement: impl Into<Arc<str>>) -> Result<Transaction<A>> {
        self.start_transaction(Some(statement.into()))
    }

    fn start_transaction(&self, begin: Option<Arc<str>>) -> Result<Transaction<A>> {
        let Some(mut dialect) = self.inner.adapter.transaction_dialect() else {
            return Err(Error::TransactionsUnsupported {
                adapter: self.adapter().to_owned(),
            });
        };
        if let Some(begin) = begin {
            dialect = dialect.with_begin(begin);
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TransactionState::Pending);

        let span = tracing::debug_span!(span_names::TRANSACTION, adapter = self.adapter());
        tokio::spawn(
            transaction::drive(self.clone(), dialect, commands_rx, state_tx).instrument(span),
        );

        Ok(Transaction::new(
            Arc::clone(&self.inner.adapter),
            commands_tx,
            state_rx,
        ))
    }

    /// Drain the pool and tear down every connection.
    ///
    /// Waits for all borrowed connections to come back. Later acquires fail
    /// with [`PoolError::PoolClosed`].
    pub async fn close(&self) {
        let span = tracing::info_span!(span_names::CLOSE, adapter = self.adapter());

        async {
            self.inner.pool.drain().await;
            self.inner.pool.destroy_all_now().await;
            self.inner.observers.emit(PoolEvent::Close);
            tracing::info!("coordinator closed");
        }
        .instrument(span)
        .await;
    }

    /// Report an error no caller is left to receive.
    pub(crate) fn fault(&self, error: &Error) {
        self.inner.observers.fault(error);
    }
}

impl<A: Adapter> fmt::Debug for Coordinator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("adapter", &self.adapter())
            .field("status", &self.status())
            .field("reset", &self.inner.reset)
            .field("observers", &self.inner.observers.len())
            .finish()
    }
}

/// Builder for a [`Coordinator`] over a [`BoundedPool`].
pub struct CoordinatorBuilder<A: Adapter> {
    adapter: A,
    params: A::Params,
    options: CoordinatorOptions<A::Connection>,
}

impl<A: Adapter> CoordinatorBuilder<A> {
    /// Set minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.options.pool = self.options.pool.min_connections(count);
        self
    }

    /// Set maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.options.pool = self.options.pool.max_connections(count);
        self
    }

    /// Set how long `acquire` waits for a free connection.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.options.pool = self.options.pool.connection_timeout(timeout);
        self
    }

    /// Enable per-borrow trace logging.
    #[must_use]
    pub fn log_pool_activity(mut self, enabled: bool) -> Self {
        self.options.pool = self.options.pool.log_pool_activity(enabled);
        self
    }

    /// Replace the whole pool configuration.
    #[must_use]
    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.options = self.options.pool(config);
        self
    }

    /// Run `hook` on every new connection.
    #[must_use]
    pub fn on_connect(mut self, hook: impl ConnectHook<A::Connection> + 'static) -> Self {
        self.options = self.options.on_connect(hook);
        self
    }

    /// Caller reset step, run before the adapter's own reset.
    #[must_use]
    pub fn reset(mut self, step: impl ResetStep<A::Connection> + 'static) -> Self {
        self.options = self.options.reset(step);
        self
    }

    /// Register an event observer.
    #[must_use]
    pub fn observer<O: PoolObserver + 'static>(mut self, observer: Arc<O>) -> Self {
        self.options = self.options.observer(observer);
        self
    }

    /// Build the coordinator and pre-create `min_connections` idle
    /// connections.
    ///
    /// Failing to pre-create connections is logged and does not fail the
    /// build; the pool creates them on demand later.
    pub async fn build(self) -> std::result::Result<Coordinator<A>, PoolError> {
        let (adapter, pool) = Coordinator::bounded_pool(self.adapter, self.params, &self.options)?;

        if let Err(error) = pool.fill_to_min().await {
            tracing::warn!(%error, "failed to pre-create minimum connections");
        }

        Ok(Coordinator::assemble(adapter, Arc::new(pool), self.options))
    }
}

impl<A: Adapter> fmt::Debug for CoordinatorBuilder<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorBuilder")
            .field("adapter", &self.adapter.name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
