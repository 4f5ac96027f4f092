//! Resource pool contract and the default bounded pool.
//!
//! The coordinator treats the pool as an opaque, internally synchronized
//! service: it only ever calls [`ResourcePool::acquire`],
//! [`ResourcePool::release`], [`ResourcePool::destroy`],
//! [`ResourcePool::drain`] and [`ResourcePool::destroy_all_now`]. How
//! connections are created and torn down is supplied back to the pool by the
//! coordinator through [`ManageConnection`].
//!
//! [`BoundedPool`] is the implementation the coordinator uses unless another
//! one is injected. It keeps a FIFO queue of idle connections and a
//! semaphore sized to `max_connections`; a connection is only created when a
//! borrower holds a slot and no idle connection is available, so the number
//! of live connections never exceeds the maximum.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::ConnectionMetadata;

/// Create/destroy callbacks a pool uses to manage its connections.
#[async_trait::async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    /// Connection type managed by the pool.
    type Connection: Send + 'static;

    /// Open a new connection.
    async fn create(&self) -> Result<Self::Connection, PoolError>;

    /// Tear down a connection that leaves the pool for good.
    async fn destroy(&self, conn: Self::Connection);
}

/// A pool of reusable connections with blocking acquire.
#[async_trait::async_trait]
pub trait ResourcePool: Send + Sync + 'static {
    /// Connection type handed out by the pool.
    type Connection: Send + 'static;

    /// Borrow a connection, waiting according to the pool's own policy.
    async fn acquire(&self) -> Result<PooledConnection<Self::Connection>, PoolError>;

    /// Return a borrowed connection for reuse.
    fn release(&self, conn: PooledConnection<Self::Connection>);

    /// Remove a borrowed connection from the pool and tear it down.
    async fn destroy(&self, conn: PooledConnection<Self::Connection>);

    /// Refuse new borrows and wait until every queued borrower has been
    /// served and every borrowed connection is back.
    async fn drain(&self);

    /// Tear down every idle connection and refuse all further borrows.
    async fn destroy_all_now(&self);

    /// Current pool counts.
    fn status(&self) -> PoolStatus;
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently borrowed.
    pub in_use: u32,
    /// Total number of live connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// A connection borrowed from a pool.
///
/// Dereferences to the underlying connection. Hand it back through the
/// coordinator (or the pool) with `release` or `destroy`; dropping it
/// instead frees its slot and drops the connection without teardown.
pub struct PooledConnection<C> {
    conn: C,
    metadata: ConnectionMetadata,
    lease: Option<Lease>,
}

impl<C> PooledConnection<C> {
    /// Wrap a connection for pools that do their own bookkeeping.
    pub fn new(conn: C, metadata: ConnectionMetadata) -> Self {
        Self {
            conn,
            metadata,
            lease: None,
        }
    }

    fn leased(conn: C, metadata: ConnectionMetadata, lease: Lease) -> Self {
        Self {
            conn,
            metadata,
            lease: Some(lease),
        }
    }

    /// Pool-assigned connection identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.metadata.id
    }

    /// Lifecycle metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut ConnectionMetadata {
        &mut self.metadata
    }

    /// Take the connection out of its wrapper.
    ///
    /// Any pool slot held by the wrapper is freed and the connection stops
    /// counting toward the pool.
    pub fn into_parts(self) -> (C, ConnectionMetadata) {
        let (conn, metadata, lease) = self.split();
        if let Some(lease) = lease {
            lease.discard();
        }
        (conn, metadata)
    }

    fn split(self) -> (C, ConnectionMetadata, Option<Lease>) {
        (self.conn, self.metadata, self.lease)
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct CountState {
    total: u32,
    in_use: u32,
    /// Borrowers admitted before a drain that do not hold a connection yet.
    waiting: u32,
    draining: bool,
}

/// Counters shared between a pool and its outstanding leases.
#[derive(Debug, Default)]
struct Counts {
    state: Mutex<CountState>,
    returned: Notify,
}

impl Counts {
    fn created(&self) {
        self.state.lock().total += 1;
    }

    /// Reserve a slot in `total` for a connection that is about to be
    /// created, unless the pool already holds `target`.
    fn reserve_below(&self, target: u32) -> bool {
        let mut state = self.state.lock();
        if state.draining || state.total >= target {
            return false;
        }
        state.total += 1;
        true
    }

    /// Admit a borrower; refused once a drain has started.
    fn enqueue(self: &Arc<Self>) -> Option<Waiter> {
        let mut state = self.state.lock();
        if state.draining {
            return None;
        }
        state.waiting += 1;
        Some(Waiter {
            counts: Arc::clone(self),
            served: false,
        })
    }

    fn checkin(&self) {
        {
            let mut state = self.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
        }
        self.returned.notify_waiters();
    }

    fn discard(&self) {
        {
            let mut state = self.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
            state.total = state.total.saturating_sub(1);
        }
        self.returned.notify_waiters();
    }

    fn forget(&self) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn begin_drain(&self) {
        self.state.lock().draining = true;
    }

    #[cfg(test)]
    fn is_draining(&self) -> bool {
        self.state.lock().draining
    }

    /// Borrowed connections plus borrowers still waiting for one.
    fn outstanding(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.in_use, state.waiting)
    }
}

/// An admitted borrower that has not been handed a connection yet.
///
/// Turned into a checkout exactly once; dropping it unserved (timeout,
/// creation failure, cancellation) wakes any drain in progress.
struct Waiter {
    counts: Arc<Counts>,
    served: bool,
}

impl Waiter {
    fn checkout(mut self) {
        self.served = true;
        let mut state = self.counts.state.lock();
        state.waiting = state.waiting.saturating_sub(1);
        state.in_use += 1;
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.served {
            {
                let mut state = self.counts.state.lock();
                state.waiting = state.waiting.saturating_sub(1);
            }
            self.counts.returned.notify_waiters();
        }
    }
}

/// A borrower's claim on a pool slot.
///
/// Settled exactly once, by check-in or discard. An unsettled lease is
/// settled as a discard when dropped.
struct Lease {
    _permit: OwnedSemaphorePermit,
    counts: Arc<Counts>,
    settled: bool,
}

impl Lease {
    fn new(permit: OwnedSemaphorePermit, counts: Arc<Counts>) -> Self {
        Self {
            _permit: permit,
            counts,
            settled: false,
        }
    }

    fn checkin(mut self) {
        self.settled = true;
        self.counts.checkin();
    }

    fn discard(mut self) {
        self.settled = true;
        self.counts.discard();
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("pooled connection dropped without release or destroy");
            self.counts.discard();
        }
    }
}

struct IdleConnection<C> {
    conn: C,
    metadata: ConnectionMetadata,
}

struct Shared<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    slots: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection<M::Connection>>>,
    counts: Arc<Counts>,
    next_id: AtomicU64,
}

impl<M: ManageConnection> Shared<M> {
    async fn teardown(&self, conn: M::Connection, mut metadata: ConnectionMetadata) {
        self.manager.destroy(conn).await;
        metadata.mark_closed();
        tracing::trace!(
            connection_id = metadata.id,
            age = ?metadata.age(),
            checkouts = metadata.checkout_count,
            "connection torn down"
        );
    }
}

/// Default pool: FIFO idle queue bounded by `max_connections`.
pub struct BoundedPool<M: ManageConnection> {
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> BoundedPool<M> {
    /// Create an empty pool.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let slots = Arc::new(Semaphore::new(config.max_connections as usize));
        Ok(Self {
            shared: Arc::new(Shared {
                manager,
                config,
                slots,
                idle: Mutex::new(VecDeque::new()),
                counts: Arc::new(Counts::default()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Create idle connections until the pool holds `min_connections`.
    ///
    /// Each creation holds a borrow slot, so this is safe to call on a pool
    /// that is already in use. Stops early when every slot is taken.
    /// Returns the number of connections created.
    pub async fn fill_to_min(&self) -> Result<u32, PoolError> {
        let min = self.shared.config.min_connections;
        let mut created = 0;
        loop {
            let Ok(permit) = Arc::clone(&self.shared.slots).try_acquire_owned() else {
                break;
            };
            if !self.shared.counts.reserve_below(min) {
                break;
            }
            let conn = match self.shared.manager.create().await {
                Ok(conn) => conn,
                Err(error) => {
                    self.shared.counts.forget();
                    return Err(error);
                }
            };
            let metadata = ConnectionMetadata::new(self.next_id());
            self.shared
                .idle
                .lock()
                .push_back(IdleConnection { conn, metadata });
            drop(permit);
            created += 1;
        }
        if created > 0 {
            tracing::debug!(created, "pre-created idle connections");
        }
        Ok(created)
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn trace_activity(&self, action: &'static str, id: u64) {
        if self.shared.config.log_pool_activity {
            let status = self.status();
            tracing::trace!(
                action,
                connection_id = id,
                available = status.available,
                in_use = status.in_use,
                total = status.total,
                "pool activity"
            );
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.slots.is_closed()
    }
}

#[async_trait::async_trait]
impl<M: ManageConnection> ResourcePool for BoundedPool<M> {
    type Connection = M::Connection;

    async fn acquire(&self) -> Result<PooledConnection<M::Connection>, PoolError> {
        let Some(waiter) = self.shared.counts.enqueue() else {
            return Err(PoolError::PoolClosed);
        };

        let timeout = self.shared.config.connection_timeout;
        let permit =
            match tokio::time::timeout(timeout, Arc::clone(&self.shared.slots).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::PoolClosed),
                Err(_) => return Err(PoolError::AcquisitionTimeout(timeout)),
            };

        let idle = self.shared.idle.lock().pop_front();
        let (conn, mut metadata) = match idle {
            Some(idle) => {
                tracing::trace!(
                    connection_id = idle.metadata.id,
                    idle_for = ?idle.metadata.idle_for(),
                    "reusing idle connection"
                );
                (idle.conn, idle.metadata)
            }
            None => {
                let conn = self.shared.manager.create().await?;
                self.shared.counts.created();
                (conn, ConnectionMetadata::new(self.next_id()))
            }
        };

        // Borrowers admitted before a drain are still served.
        waiter.checkout();
        metadata.mark_checkout();
        self.trace_activity("acquire", metadata.id);
        let lease = Lease::new(permit, Arc::clone(&self.shared.counts));
        Ok(PooledConnection::leased(conn, metadata, lease))
    }

    fn release(&self, conn: PooledConnection<M::Connection>) {
        let (conn, mut metadata, lease) = conn.split();
        let id = metadata.id;

        if self.is_closed() {
            metadata.mark_closing();
            if let Some(lease) = lease {
                lease.discard();
            }
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.teardown(conn, metadata).await });
            tracing::debug!(connection_id = id, "released into closed pool, destroying");
            return;
        }

        metadata.mark_checkin();
        self.shared
            .idle
            .lock()
            .push_back(IdleConnection { conn, metadata });
        match lease {
            Some(lease) => lease.checkin(),
            None => self.shared.counts.created(),
        }
        self.trace_activity("release", id);
    }

    async fn destroy(&self, conn: PooledConnection<M::Connection>) {
        let (conn, mut metadata, lease) = conn.split();
        let id = metadata.id;
        metadata.mark_closing();
        self.shared.teardown(conn, metadata).await;
        if let Some(lease) = lease {
            lease.discard();
        }
        self.trace_activity("destroy", id);
    }

    async fn drain(&self) {
        self.shared.counts.begin_drain();
        loop {
            let returned = self.shared.counts.returned.notified();
            let (in_use, waiting) = self.shared.counts.outstanding();
            if in_use == 0 && waiting == 0 {
                break;
            }
            tracing::debug!(in_use, waiting, "waiting for borrowers to finish");
            returned.await;
        }
        tracing::debug!("pool drained");
    }

    async fn destroy_all_now(&self) {
        self.shared.counts.begin_drain();
        self.shared.slots.close();
        let idle: Vec<_> = self.shared.idle.lock().drain(..).collect();
        let count = idle.len();
        for IdleConnection { conn, mut metadata } in idle {
            metadata.mark_closing();
            self.shared.teardown(conn, metadata).await;
            self.shared.counts.forget();
        }
        tracing::debug!(destroyed = count, "destroyed idle connections");
    }

    fn status(&self) -> PoolStatus {
        let available = u32::try_from(self.shared.idle.lock().len()).unwrap_or(u32::MAX);
        let state = self.shared.counts.state.lock();
        PoolStatus {
            available,
            in_use: state.in_use,
            total: state.total,
            max: self.shared.config.max_connections,
        }
    }
}
