//! Reset chain run on every connection return.
//!
//! Connections must not go back to the pool carrying session state from the
//! previous borrower: open cursors, altered session variables, temp tables,
//! an open transaction. The [`ResetChain`] is the single place that clears
//! it. Each step runs to completion before the next one starts, and the
//! first failure aborts the chain.
//!
//! ## Ordering
//!
//! | Position | Step |
//! |----------|------|
//! | 1 | caller-supplied reset ([`CoordinatorOptions::reset`](crate::CoordinatorOptions)) |
//! | 2 | adapter reset ([`Adapter::reset_step`](crate::Adapter::reset_step)) |

use std::fmt;
use std::sync::Arc;

use crate::adapter::{Connection, Query};
use crate::error::{AdapterError, ResetError};

/// One step of the reset chain.
#[async_trait::async_trait]
pub trait ResetStep<C>: Send + Sync {
    /// Name used in logs and in [`ResetError`].
    fn name(&self) -> &str {
        "reset"
    }

    /// Clear session state on the connection.
    async fn reset(&self, conn: &mut C) -> Result<(), AdapterError>;
}

/// Reset step that executes a single statement, such as
/// `sp_reset_connection` or `DISCARD ALL`.
#[derive(Debug, Clone)]
pub struct StatementReset {
    statement: Arc<str>,
}

impl StatementReset {
    /// Create a reset step for a statement.
    pub fn new(statement: impl Into<Arc<str>>) -> Self {
        Self {
            statement: statement.into(),
        }
    }

    /// The reset statement.
    #[must_use]
    pub fn statement(&self) -> &str {
        &self.statement
    }
}

#[async_trait::async_trait]
impl<C: Connection> ResetStep<C> for StatementReset {
    fn name(&self) -> &str {
        &self.statement
    }

    async fn reset(&self, conn: &mut C) -> Result<(), AdapterError> {
        let query = Query::new(Arc::clone(&self.statement), ());
        conn.execute(&query).await.map(|_| ())
    }
}

/// Ordered composition of reset steps.
pub struct ResetChain<C> {
    steps: Vec<Arc<dyn ResetStep<C>>>,
}

impl<C> ResetChain<C> {
    /// Build the chain from the adapter step and the caller step.
    ///
    /// The caller step runs first.
    pub fn new(
        adapter_step: Option<Arc<dyn ResetStep<C>>>,
        caller_step: Option<Arc<dyn ResetStep<C>>>,
    ) -> Self {
        Self {
            steps: caller_step.into_iter().chain(adapter_step).collect(),
        }
    }

    /// Build a chain that runs `steps` in the given order.
    pub fn from_steps(steps: Vec<Arc<dyn ResetStep<C>>>) -> Self {
        Self { steps }
    }

    /// A chain with no steps. Always succeeds.
    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the chain has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.name())
    }

    /// Run every step in order, stopping at the first failure.
    pub async fn run(&self, conn: &mut C) -> Result<(), ResetError> {
        for (index, step) in self.steps.iter().enumerate() {
            if let Err(source) = step.reset(conn).await {
                return Err(ResetError {
                    step: step.name().to_owned(),
                    index,
                    source,
                });
            }
        }
        Ok(())
    }
}

impl<C> Default for ResetChain<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C> fmt::Debug for ResetChain<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetChain")
            .field("steps", &self.step_names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    /// Connection stand-in that records which steps touched it.
    #[derive(Default)]
    struct Trace {
        ran: Vec<String>,
    }

    struct Step {
        name: String,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ResetStep<Trace> for Step {
        fn name(&self) -> &str {
            &self.name
        }

        async fn reset(&self, conn: &mut Trace) -> Result<(), AdapterError> {
            conn.ran.push(self.name.clone());
            if self.fail {
                Err(AdapterError::new(format!("{} failed", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn step(name: &str, fail: bool) -> Arc<dyn ResetStep<Trace>> {
        Arc::new(Step {
            name: name.into(),
            fail,
        })
    }

    #[tokio::test]
    async fn test_empty_chain_succeeds() {
        let chain = ResetChain::<Trace>::empty();
        let mut conn = Trace::default();

        assert!(chain.is_empty());
        assert!(chain.run(&mut conn).await.is_ok());
        assert!(conn.ran.is_empty());
    }

    #[tokio::test]
    async fn test_caller_step_runs_before_adapter_step() {
        let chain = ResetChain::new(Some(step("adapter", false)), Some(step("caller", false)));
        let mut conn = Trace::default();

        chain.run(&mut conn).await.unwrap();
        assert_eq!(conn.ran, vec!["caller", "adapter"]);
    }

    #[tokio::test]
    async fn test_adapter_step_alone() {
        let chain = ResetChain::new(Some(step("adapter", false)), None);
        assert_eq!(chain.step_names().collect::<Vec<_>>(), vec!["adapter"]);
    }

    #[tokio::test]
    async fn test_failure_short_circuits() {
        let chain = ResetChain::new(Some(step("adapter", false)), Some(step("caller", true)));
        let mut conn = Trace::default();

        let err = chain.run(&mut conn).await.unwrap_err();
        assert_eq!(err.index, 0);
        assert_eq!(err.step, "caller");
        assert_eq!(err.source.message(), "caller failed");
        assert_eq!(conn.ran, vec!["caller"]);
    }

    #[test]
    fn test_debug_lists_steps() {
        let chain = ResetChain::new(Some(step("adapter", false)), Some(step("caller", false)));
        assert_eq!(
            format!("{chain:?}"),
            r#"ResetChain { steps: ["caller", "adapter"] }"#
        );
    }

    #[tokio::test]
    async fn test_statement_reset_executes_statement() {
        struct Recorder(Arc<Mutex<Vec<String>>>);

        #[async_trait::async_trait]
        impl Connection for Recorder {
            type Output = ();

            async fn execute(&mut self, query: &Query) -> Result<(), AdapterError> {
                self.0.lock().push(query.statement().to_owned());
                Ok(())
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut conn = Recorder(Arc::clone(&seen));
        let reset: Arc<dyn ResetStep<Recorder>> = Arc::new(StatementReset::new("DISCARD ALL"));
        let chain = ResetChain::new(Some(reset), None);

        chain.run(&mut conn).await.unwrap();
        assert_eq!(*seen.lock(), vec!["DISCARD ALL".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_chain_stops_at_first_failure(fails in proptest::collection::vec(any::<bool>(), 0..8)) {
            let steps = fails
                .iter()
                .enumerate()
                .map(|(i, fail)| step(&format!("step{i}"), *fail))
                .collect();
            let chain = ResetChain::from_steps(steps);
            let mut conn = Trace::default();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");
            let result = runtime.block_on(chain.run(&mut conn));

            match fails.iter().position(|fail| *fail) {
                Some(first) => {
                    let err = result.expect_err("chain should fail");
                    prop_assert_eq!(err.index, first);
                    prop_assert_eq!(conn.ran.len(), first + 1);
                }
                None => {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(conn.ran.len(), fails.len());
                }
            }
        }
    }
}
