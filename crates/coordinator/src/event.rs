//! Lifecycle events and observers.
//!
//! The coordinator reports what it does through [`PoolEvent`]s delivered to
//! every registered [`PoolObserver`]. Failures that already reached a caller
//! through a `Result` are not repeated here; [`PoolEvent::Error`] only
//! carries faults nobody else is positioned to see, such as a query error
//! whose handle was dropped.

use crate::error::Error;
use crate::instrumentation::SanitizationConfig;

/// Something that happened in the coordinator.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum PoolEvent<'a> {
    /// A connection is about to be requested from the pool.
    Acquire,
    /// A borrowed connection is being handed back.
    Release {
        /// Pool-assigned connection identifier.
        connection_id: u64,
    },
    /// A query was bound to a connection.
    Query {
        /// Statement text.
        statement: &'a str,
        /// Pool-assigned connection identifier.
        connection_id: u64,
    },
    /// The pool finished draining and tore down its connections.
    Close,
    /// An error with no caller left to receive it.
    Error(&'a Error),
}

impl PoolEvent<'_> {
    /// Short name of the event kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Release { .. } => "release",
            Self::Query { .. } => "query",
            Self::Close => "close",
            Self::Error(_) => "error",
        }
    }
}

/// Receives coordinator events.
///
/// Observers are called inline on the task that produced the event and
/// should return quickly.
pub trait PoolObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &PoolEvent<'_>);
}

/// Observer that logs every event through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    sanitization: SanitizationConfig,
}

impl TracingObserver {
    /// Create an observer that sanitizes statements before logging them.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom statement sanitization policy.
    #[must_use]
    pub fn with_sanitization(mut self, sanitization: SanitizationConfig) -> Self {
        self.sanitization = sanitization;
        self
    }
}

impl PoolObserver for TracingObserver {
    fn on_event(&self, event: &PoolEvent<'_>) {
        match event {
            PoolEvent::Acquire => tracing::debug!("acquiring connection"),
            PoolEvent::Release { connection_id } => {
                tracing::debug!(connection_id, "releasing connection");
            }
            PoolEvent::Query {
                statement,
                connection_id,
            } => {
                let statement = self.sanitization.sanitize(statement);
                tracing::debug!(connection_id, %statement, "query bound to connection");
            }
            PoolEvent::Close => tracing::info!("connection pool closed"),
            PoolEvent::Error(error) => tracing::error!(%error, "unhandled coordinator error"),
        }
    }
}

/// Fan-out to the registered observers.
#[derive(Default)]
pub(crate) struct Observers {
    observers: Vec<std::sync::Arc<dyn PoolObserver>>,
}

impl Observers {
    pub(crate) fn new(observers: Vec<std::sync::Arc<dyn PoolObserver>>) -> Self {
        Self { observers }
    }

    pub(crate) fn emit(&self, event: PoolEvent<'_>) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    /// Report an error nobody else will see.
    ///
    /// Falls back to an `error` log when no observer is registered so the
    /// failure is never silent.
    pub(crate) fn fault(&self, error: &Error) {
        if self.observers.is_empty() {
            tracing::error!(%error, "unhandled coordinator error");
            return;
        }
        self.emit(PoolEvent::Error(error));
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }
}
