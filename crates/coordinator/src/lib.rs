//! # conn-coordinator
//!
//! Borrow/return protocol for pooled, stateful database connections.
//!
//! The coordinator sits between application code and a pool of reusable
//! connections. Network I/O and wire protocols belong to a pluggable
//! [`Adapter`]; connection bookkeeping belongs to a [`ResourcePool`]. This
//! crate guarantees the part in between: every borrowed connection is
//! handed back exactly once, after its work finished, in a clean state.
//!
//! ## Features
//!
//! - Queries and transactions bound to the borrow/return protocol
//! - Reset chain (caller step, then adapter step) on every return
//! - Connections whose reset fails are destroyed, never reused
//! - Bounded default pool with acquisition timeout and graceful drain
//! - Lifecycle events through injected [`PoolObserver`]s
//!
//! ## Example
//!
//! ```rust,ignore
//! use conn_coordinator::{Coordinator, TracingObserver};
//! use std::sync::Arc;
//!
//! let coordinator = Coordinator::builder(PgAdapter::new(), "postgres://localhost/app")
//!     .max_connections(10)
//!     .observer(Arc::new(TracingObserver::new()))
//!     .build()
//!     .await?;
//!
//! let count = coordinator.query("SELECT count(*) FROM users", ()).await?;
//! coordinator.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod instrumentation;
pub mod lifecycle;
pub mod pool;
pub mod query;
pub mod reset;
pub mod transaction;

pub use adapter::{Adapter, ConnectHook, Connection, Params, Query, TransactionDialect, Value};
pub use config::PoolConfig;
pub use coordinator::{
    AdapterManager, Coordinator, CoordinatorBuilder, CoordinatorOptions, QueryOutput,
};
pub use error::{AdapterError, Error, PoolError, ResetError, Result};
pub use event::{PoolEvent, PoolObserver, TracingObserver};
pub use instrumentation::SanitizationConfig;
pub use lifecycle::{ConnectionMetadata, ConnectionState};
pub use pool::{BoundedPool, ManageConnection, PoolStatus, PooledConnection, ResourcePool};
pub use query::{QueryHandle, QueryState};
pub use reset::{ResetChain, ResetStep, StatementReset};
pub use transaction::{Transaction, TransactionState};
