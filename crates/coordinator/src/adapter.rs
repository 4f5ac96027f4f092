//! Adapter contract.
//!
//! An [`Adapter`] knows how to open, use and close connections for one
//! backend. The coordinator never talks to a backend directly: it asks the
//! adapter for connections and query objects, and hands queries to the
//! connection the pool lent out.
//!
//! ## Capabilities
//!
//! | Capability | Method | Required |
//! |------------|--------|----------|
//! | Create a connection | [`Adapter::connect`] | yes |
//! | Create a query object | [`Adapter::create_query`] | default provided |
//! | Transactions | [`Adapter::transaction_dialect`] | optional |
//! | Reset on return | [`Adapter::reset_statement`] / [`Adapter::reset_step`] | optional |
//! | Teardown | [`Connection::close`] | default provided |

use std::fmt;
use std::sync::Arc;

use crate::error::AdapterError;
use crate::reset::{ResetStep, StatementReset};

/// A parameter value bound to a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Positional statement parameters.
///
/// `()` converts into an empty parameter list, so statements without
/// parameters can be issued as `coordinator.query("SELECT 1", ())`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<Value>);

impl Params {
    /// An empty parameter list.
    #[must_use]
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The parameter values in order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Self::none()
    }
}

impl<T: Into<Value>> From<Vec<T>> for Params {
    fn from(values: Vec<T>) -> Self {
        Self(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Params {
    fn from(values: [T; N]) -> Self {
        Self(values.into_iter().map(Into::into).collect())
    }
}

/// A single statement with its parameters.
///
/// Created once per call through [`Adapter::create_query`] and never reused.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    statement: Arc<str>,
    params: Params,
}

impl Query {
    /// Create a query.
    pub fn new(statement: impl Into<Arc<str>>, params: impl Into<Params>) -> Self {
        Self {
            statement: statement.into(),
            params: params.into(),
        }
    }

    /// The statement text.
    #[must_use]
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// The bound parameters.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.statement)
    }
}

/// Statements an adapter uses to drive a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDialect {
    /// Statement that opens a transaction.
    pub begin: Arc<str>,
    /// Statement that commits.
    pub commit: Arc<str>,
    /// Statement that rolls back.
    pub rollback: Arc<str>,
}

impl Default for TransactionDialect {
    fn default() -> Self {
        Self {
            begin: Arc::from("BEGIN"),
            commit: Arc::from("COMMIT"),
            rollback: Arc::from("ROLLBACK"),
        }
    }
}

impl TransactionDialect {
    /// Replace the begin statement.
    #[must_use]
    pub fn with_begin(mut self, statement: impl Into<Arc<str>>) -> Self {
        self.begin = statement.into();
        self
    }
}

/// A live backend connection.
///
/// A connection runs one statement at a time; the coordinator guarantees it
/// is never shared between two borrowers.
#[async_trait::async_trait]
pub trait Connection: Send + Sized + 'static {
    /// What a successful statement produces (rows, affected count, ...).
    type Output: Send + 'static;

    /// Execute a statement.
    async fn execute(&mut self, query: &Query) -> Result<Self::Output, AdapterError>;

    /// Tear the connection down.
    ///
    /// Called when the pool evicts the connection or a reset fails.
    async fn close(self) {}
}

/// A backend driver.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Connection type produced by this adapter.
    type Connection: Connection;

    /// Parameters needed to open a connection (address, credentials, ...).
    type Params: Send + Sync + 'static;

    /// Identifying name, exposed as [`Coordinator::adapter`](crate::Coordinator::adapter).
    fn name(&self) -> &str;

    /// Open a new connection.
    async fn connect(&self, params: &Self::Params) -> Result<Self::Connection, AdapterError>;

    /// Build the query object for a call.
    ///
    /// Adapters can override this to rewrite placeholders or validate
    /// parameters; the default passes statement and parameters through.
    fn create_query(&self, statement: &str, params: Params) -> Query {
        Query::new(statement, params)
    }

    /// Transaction statements, or `None` if the backend has no transactions.
    fn transaction_dialect(&self) -> Option<TransactionDialect> {
        None
    }

    /// Statement that clears session state before a connection is reused.
    fn reset_statement(&self) -> Option<&str> {
        None
    }

    /// Adapter-level reset step.
    ///
    /// Defaults to executing [`reset_statement`](Self::reset_statement).
    fn reset_step(&self) -> Option<Arc<dyn ResetStep<Self::Connection>>> {
        self.reset_statement()
            .map(|statement| Arc::new(StatementReset::new(statement)) as Arc<dyn ResetStep<_>>)
    }
}

/// Initialization run on every freshly created connection before it enters
/// the pool.
#[async_trait::async_trait]
pub trait ConnectHook<C>: Send + Sync {
    /// Prepare the connection. An error fails the connection creation.
    async fn on_connect(&self, conn: &mut C) -> Result<(), AdapterError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_unit_is_empty() {
        let params = Params::from(());
        assert!(params.is_empty());
    }

    #[test]
    fn test_params_from_mixed_values() {
        let params = Params::from(vec![Value::from(1), Value::from("a"), Value::from(None::<i64>)]);
        assert_eq!(params.len(), 3);
        assert_eq!(params.values()[0], Value::Int(1));
        assert_eq!(params.values()[1], Value::Text("a".into()));
        assert_eq!(params.values()[2], Value::Null);
    }

    #[test]
    fn test_params_from_array() {
        let params = Params::from([10_i64, 20]);
        assert_eq!(params.values(), &[Value::Int(10), Value::Int(20)]);
    }

    #[test]
    fn test_query_accessors() {
        let query = Query::new("SELECT * FROM users WHERE id = $1", [7_i64]);
        assert_eq!(query.statement(), "SELECT * FROM users WHERE id = $1");
        assert_eq!(query.params().len(), 1);
        assert_eq!(query.to_string(), "SELECT * FROM users WHERE id = $1");
    }

    #[test]
    fn test_dialect_begin_override() {
        let dialect = TransactionDialect::default().with_begin("BEGIN ISOLATION LEVEL SERIALIZABLE");
        assert_eq!(&*dialect.begin, "BEGIN ISOLATION LEVEL SERIALIZABLE");
        assert_eq!(&*dialect.commit, "COMMIT");
        assert_eq!(&*dialect.rollback, "ROLLBACK");
    }
}
