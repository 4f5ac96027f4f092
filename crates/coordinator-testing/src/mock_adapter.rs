//! Scriptable in-memory adapter.
//!
//! [`MockAdapter`] answers statements from a response table instead of a
//! backend. Every connection it opens shares one [`MockState`], which tests
//! keep a handle to in order to script failures at runtime and to inspect
//! what the coordinator did: how many connections were opened and closed
//! and which statements ran on which connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use conn_coordinator::{Adapter, AdapterError, Connection, Query, TransactionDialect, Value};
use parking_lot::Mutex;

/// What a mock statement produces.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutput {
    /// No result set.
    Empty,
    /// Rows affected.
    Affected(u64),
    /// A single value.
    Scalar(Value),
}

/// Scripted reaction to a statement.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Succeed with an output.
    Output(MockOutput),
    /// Fail with an adapter error.
    Error(AdapterError),
}

impl MockResponse {
    /// A single integer value.
    #[must_use]
    pub fn scalar_int(value: i64) -> Self {
        Self::Output(MockOutput::Scalar(Value::Int(value)))
    }

    /// Rows affected.
    #[must_use]
    pub fn affected(count: u64) -> Self {
        Self::Output(MockOutput::Affected(count))
    }

    /// Empty success.
    #[must_use]
    pub fn empty() -> Self {
        Self::Output(MockOutput::Empty)
    }

    /// Failure with a backend error code and message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(AdapterError::new(message).with_code(code))
    }
}

/// A statement the mock executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    /// Mock-assigned connection serial, starting at 1.
    pub connection: u32,
    /// Statement text.
    pub statement: String,
}

/// State shared by a [`MockAdapter`] and all its connections.
#[derive(Debug)]
pub struct MockState {
    responses: Mutex<HashMap<String, MockResponse>>,
    delays: Mutex<HashMap<String, Duration>>,
    default_response: MockResponse,
    executed: Mutex<Vec<Executed>>,
    opened: AtomicU32,
    closed: AtomicU32,
    refuse_connections: AtomicBool,
}

impl MockState {
    fn new(
        responses: HashMap<String, MockResponse>,
        delays: HashMap<String, Duration>,
        default_response: MockResponse,
    ) -> Self {
        Self {
            responses: Mutex::new(responses),
            delays: Mutex::new(delays),
            default_response,
            executed: Mutex::new(Vec::new()),
            opened: AtomicU32::new(0),
            closed: AtomicU32::new(0),
            refuse_connections: AtomicBool::new(false),
        }
    }

    /// Replace the response for a statement.
    pub fn set_response(&self, sql: impl Into<String>, response: MockResponse) {
        self.responses.lock().insert(sql.into(), response);
    }

    /// Make `connect` fail until switched back.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Number of connections opened.
    #[must_use]
    pub fn connections_opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of connections closed.
    #[must_use]
    pub fn connections_closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn connections_live(&self) -> u32 {
        self.connections_opened()
            .saturating_sub(self.connections_closed())
    }

    /// Every executed statement in order.
    #[must_use]
    pub fn executed(&self) -> Vec<Executed> {
        self.executed.lock().clone()
    }

    /// Executed statement texts in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.executed
            .lock()
            .iter()
            .map(|e| e.statement.clone())
            .collect()
    }

    /// How many times `sql` ran.
    #[must_use]
    pub fn count(&self, sql: &str) -> usize {
        self.executed
            .lock()
            .iter()
            .filter(|e| e.statement == sql)
            .count()
    }

    fn respond(&self, sql: &str) -> MockResponse {
        self.responses
            .lock()
            .get(sql)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone())
    }

    fn delay(&self, sql: &str) -> Option<Duration> {
        self.delays.lock().get(sql).copied()
    }
}

/// A connection opened by [`MockAdapter`].
#[derive(Debug)]
pub struct MockConnection {
    serial: u32,
    state: Arc<MockState>,
}

impl MockConnection {
    /// Mock-assigned serial, starting at 1.
    #[must_use]
    pub fn serial(&self) -> u32 {
        self.serial
    }
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    type Output = MockOutput;

    async fn execute(&mut self, query: &Query) -> Result<MockOutput, AdapterError> {
        let sql = query.statement();
        self.state.executed.lock().push(Executed {
            connection: self.serial,
            statement: sql.to_owned(),
        });

        if let Some(delay) = self.state.delay(sql) {
            tokio::time::sleep(delay).await;
        }

        match self.state.respond(sql) {
            MockResponse::Output(output) => Ok(output),
            MockResponse::Error(error) => {
                tracing::debug!(connection = self.serial, %error, "mock statement failed");
                Err(error)
            }
        }
    }

    async fn close(self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(connection = self.serial, "mock connection closed");
    }
}

/// In-memory [`Adapter`] driven by a response table.
#[derive(Debug)]
pub struct MockAdapter {
    name: String,
    state: Arc<MockState>,
    dialect: Option<TransactionDialect>,
    reset_statement: Option<String>,
}

impl MockAdapter {
    /// Start configuring a mock adapter.
    pub fn builder() -> MockAdapterBuilder {
        MockAdapterBuilder::new()
    }

    /// Handle to the shared state.
    #[must_use]
    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

#[async_trait::async_trait]
impl Adapter for MockAdapter {
    type Connection = MockConnection;
    type Params = ();

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, _params: &()) -> Result<MockConnection, AdapterError> {
        if self.state.refuse_connections.load(Ordering::SeqCst) {
            return Err(AdapterError::new("connection refused").with_code("08001"));
        }
        let serial = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(connection = serial, "mock connection opened");
        Ok(MockConnection {
            serial,
            state: Arc::clone(&self.state),
        })
    }

    fn transaction_dialect(&self) -> Option<TransactionDialect> {
        self.dialect.clone()
    }

    fn reset_statement(&self) -> Option<&str> {
        self.reset_statement.as_deref()
    }
}

/// Builder for [`MockAdapter`].
#[derive(Debug)]
pub struct MockAdapterBuilder {
    name: String,
    responses: HashMap<String, MockResponse>,
    delays: HashMap<String, Duration>,
    default_response: MockResponse,
    dialect: Option<TransactionDialect>,
    reset_statement: Option<String>,
}

impl MockAdapterBuilder {
    /// Create a builder: no transactions, no reset, empty default response.
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            responses: HashMap::new(),
            delays: HashMap::new(),
            default_response: MockResponse::empty(),
            dialect: None,
            reset_statement: None,
        }
    }

    /// Set the adapter name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a response for a specific statement.
    #[must_use]
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.responses.insert(sql.into(), response);
        self
    }

    /// Set the response for unmatched statements.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Make a statement take `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, sql: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(sql.into(), delay);
        self
    }

    /// Support transactions with the default `BEGIN`/`COMMIT`/`ROLLBACK`.
    #[must_use]
    pub fn with_transactions(self) -> Self {
        self.with_dialect(TransactionDialect::default())
    }

    /// Support transactions with a custom dialect.
    #[must_use]
    pub fn with_dialect(mut self, dialect: TransactionDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Run `sql` as the adapter reset on every return.
    #[must_use]
    pub fn with_reset_statement(mut self, sql: impl Into<String>) -> Self {
        self.reset_statement = Some(sql.into());
        self
    }

    /// Build the adapter.
    #[must_use]
    pub fn build(self) -> MockAdapter {
        MockAdapter {
            name: self.name,
            state: Arc::new(MockState::new(
                self.responses,
                self.delays,
                self.default_response,
            )),
            dialect: self.dialect,
            reset_statement: self.reset_statement,
        }
    }
}

impl Default for MockAdapterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use conn_coordinator::ResetStep;

    #[tokio::test]
    async fn test_scripted_responses() {
        let adapter = MockAdapter::builder()
            .with_response("SELECT 1", MockResponse::scalar_int(1))
            .with_response("BAD", MockResponse::error("42000", "syntax"))
            .build();
        let state = adapter.state();

        let mut conn = adapter.connect(&()).await.unwrap();
        assert_eq!(conn.serial(), 1);
        assert_eq!(
            conn.execute(&Query::new("SELECT 1", ())).await.unwrap(),
            MockOutput::Scalar(Value::Int(1))
        );
        let err = conn.execute(&Query::new("BAD", ())).await.unwrap_err();
        assert_eq!(err.code(), Some("42000"));
        assert_eq!(
            conn.execute(&Query::new("OTHER", ())).await.unwrap(),
            MockOutput::Empty
        );

        conn.close().await;
        assert_eq!(state.statements(), vec!["SELECT 1", "BAD", "OTHER"]);
        assert_eq!(state.connections_live(), 0);
    }

    #[tokio::test]
    async fn test_refuse_connections() {
        let adapter = MockAdapter::builder().build();
        adapter.state().refuse_connections(true);

        let err = adapter.connect(&()).await.unwrap_err();
        assert_eq!(err.code(), Some("08001"));
        assert_eq!(adapter.state().connections_opened(), 0);
    }

    #[test]
    fn test_capabilities() {
        let plain = MockAdapter::builder().build();
        assert!(plain.transaction_dialect().is_none());
        assert!(plain.reset_step().is_none());

        let full = MockAdapter::builder()
            .with_transactions()
            .with_reset_statement("DISCARD ALL")
            .build();
        assert!(full.transaction_dialect().is_some());
        assert_eq!(full.reset_step().unwrap().name(), "DISCARD ALL");
    }
}
