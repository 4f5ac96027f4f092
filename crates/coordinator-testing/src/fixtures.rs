//! Test fixture utilities.

use std::sync::Arc;
use std::time::Duration;

use conn_coordinator::{Coordinator, CoordinatorOptions, PoolConfig, PoolError};

use crate::mock_adapter::{MockAdapter, MockConnection, MockState};
use crate::observer::RecordingObserver;

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A coordinator over a [`MockAdapter`] with a recording observer attached.
#[derive(Debug)]
pub struct TestCoordinator {
    /// The coordinator under test.
    pub coordinator: Coordinator<MockAdapter>,
    /// Shared mock state.
    pub state: Arc<MockState>,
    /// Every event the coordinator emitted.
    pub events: Arc<RecordingObserver>,
}

impl TestCoordinator {
    /// Pool settings used by [`TestCoordinator::new`]: at most `max`
    /// connections and a short acquisition timeout.
    #[must_use]
    pub fn pool_config(max: u32) -> PoolConfig {
        PoolConfig::new()
            .max_connections(max)
            .connection_timeout(Duration::from_millis(200))
    }

    /// Build a coordinator over `adapter` with at most `max` connections.
    pub fn new(adapter: MockAdapter, max: u32) -> Result<Self, PoolError> {
        Self::with_options(adapter, CoordinatorOptions::new().pool(Self::pool_config(max)))
    }

    /// Build a coordinator with caller-supplied options.
    ///
    /// The recording observer is added to whatever `options` already hold.
    pub fn with_options(
        adapter: MockAdapter,
        options: CoordinatorOptions<MockConnection>,
    ) -> Result<Self, PoolError> {
        init_tracing();
        let state = adapter.state();
        let events = Arc::new(RecordingObserver::new());
        let options = options.observer(Arc::clone(&events));
        let coordinator = Coordinator::new(adapter, (), options)?;
        Ok(Self {
            coordinator,
            state,
            events,
        })
    }
}
