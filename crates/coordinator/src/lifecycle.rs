//! Per-connection lifecycle bookkeeping.
//!
//! The pool tags every connection it creates with [`ConnectionMetadata`].
//! The metadata travels with the connection while it is borrowed, so the
//! coordinator can name the connection in events and logs without owning it.

use std::time::{Duration, Instant};

/// Where a connection is in the borrow/return cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Sitting in the pool, available for checkout.
    Idle,
    /// Borrowed by exactly one caller.
    InUse,
    /// Running the reset chain on its way back to the pool.
    Resetting,
    /// Being torn down.
    Closing,
    /// Torn down; must not be used again.
    Closed,
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Identifier assigned by the pool, unique per pool.
    pub id: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
    /// Current state of the connection.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
            state: ConnectionState::Idle,
        }
    }

    /// Time since the connection was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last checked out or returned.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.state = ConnectionState::InUse;
    }

    /// Mark the connection as running its reset chain.
    pub fn mark_resetting(&mut self) {
        self.state = ConnectionState::Resetting;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.state = ConnectionState::Idle;
    }

    /// Mark the connection as being torn down.
    pub fn mark_closing(&mut self) {
        self.state = ConnectionState::Closing;
    }

    /// Mark the connection as torn down.
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}
