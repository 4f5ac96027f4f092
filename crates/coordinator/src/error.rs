//! Error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the resource pool while producing a connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    /// Failed to acquire a connection within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Pool is draining or closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Connection creation failed.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(String),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

/// An error reported by an adapter.
///
/// Adapters wrap their backend-specific failures into this type so the
/// coordinator can route them without knowing the backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AdapterError {
    message: String,
    code: Option<String>,
}

impl AdapterError {
    /// Create an adapter error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a backend error code (SQLSTATE, server error number, ...).
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The backend error code, if the adapter supplied one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

/// A reset step failed while returning a connection.
///
/// Reset failures never reach callers; the coordinator destroys the
/// connection instead of returning it to the pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("reset step {index} ({step}) failed: {source}")]
pub struct ResetError {
    /// Name of the failing step.
    pub step: String,
    /// Position of the failing step in the chain.
    pub index: usize,
    /// Underlying failure.
    #[source]
    pub source: AdapterError,
}

/// Errors surfaced to callers of the coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The pool could not produce a connection.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The adapter reported a failure while executing a statement.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// The adapter has no transaction support.
    #[error("adapter {adapter} does not support transactions")]
    TransactionsUnsupported {
        /// Adapter name.
        adapter: String,
    },

    /// The transaction already reached a terminal state.
    #[error("transaction is already closed")]
    TransactionClosed,

    /// The task driving the operation ended without producing a result.
    #[error("operation abandoned before completion")]
    Abandoned,
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    ///
    /// The coordinator never retries on its own; this is a hint for callers.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Pool(PoolError::AcquisitionTimeout(_) | PoolError::ConnectionCreation(_))
        )
    }

    /// Check if this error came from acquiring a connection.
    #[must_use]
    pub fn is_acquisition(&self) -> bool {
        matches!(self, Self::Pool(_))
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::from(PoolError::AcquisitionTimeout(Duration::from_secs(1))).is_transient());
        assert!(Error::from(PoolError::ConnectionCreation("refused".into())).is_transient());
        assert!(!Error::from(PoolError::PoolClosed).is_transient());
        assert!(!Error::TransactionClosed.is_transient());
    }

    #[test]
    fn test_pool_error_is_transparent() {
        let err = Error::from(PoolError::PoolClosed);
        assert_eq!(err.to_string(), "pool is closed");
        assert!(err.is_acquisition());
    }

    #[test]
    fn test_adapter_error_code() {
        let err = AdapterError::new("syntax error").with_code("42601");
        assert_eq!(err.code(), Some("42601"));
        assert_eq!(Error::from(err).to_string(), "adapter error: syntax error");
    }

    #[test]
    fn test_reset_error_display() {
        let err = ResetError {
            step: "sp_reset_connection".into(),
            index: 1,
            source: AdapterError::new("broken pipe"),
        };
        assert_eq!(
            err.to_string(),
            "reset step 1 (sp_reset_connection) failed: broken pipe"
        );
    }
}
