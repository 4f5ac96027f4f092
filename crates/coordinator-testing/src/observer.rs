//! Observer that records every coordinator event.

use std::time::Duration;

use conn_coordinator::{Error, PoolEvent, PoolObserver};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Owned copy of a [`PoolEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    /// Connection requested.
    Acquire,
    /// Connection handed back.
    Release {
        /// Pool-assigned connection identifier.
        connection_id: u64,
    },
    /// Query bound to a connection.
    Query {
        /// Statement text.
        statement: String,
        /// Pool-assigned connection identifier.
        connection_id: u64,
    },
    /// Pool closed.
    Close,
    /// Unobserved failure.
    Error(Error),
    /// An event kind this recorder does not know.
    Other(&'static str),
}

impl RecordedEvent {
    /// Short name of the event kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Release { .. } => "release",
            Self::Query { .. } => "query",
            Self::Close => "close",
            Self::Error(_) => "error",
            Self::Other(name) => name,
        }
    }
}

impl From<&PoolEvent<'_>> for RecordedEvent {
    fn from(event: &PoolEvent<'_>) -> Self {
        match event {
            PoolEvent::Acquire => Self::Acquire,
            PoolEvent::Release { connection_id } => Self::Release {
                connection_id: *connection_id,
            },
            PoolEvent::Query {
                statement,
                connection_id,
            } => Self::Query {
                statement: (*statement).to_owned(),
                connection_id: *connection_id,
            },
            PoolEvent::Close => Self::Close,
            PoolEvent::Error(error) => Self::Error((*error).clone()),
            other => Self::Other(other.name()),
        }
    }
}

/// [`PoolObserver`] that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RecordedEvent>>,
    recorded: Notify,
}

impl RecordingObserver {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in the order they were emitted.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Event kind names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(RecordedEvent::name).collect()
    }

    /// Number of events of one kind.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }

    /// Errors reported on the fault channel.
    #[must_use]
    pub fn errors(&self) -> Vec<Error> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Wait until at least `count` events of kind `name` were recorded.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for(&self, name: &str, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let recorded = self.recorded.notified();
                if self.count(name) >= count {
                    return;
                }
                recorded.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl PoolObserver for RecordingObserver {
    fn on_event(&self, event: &PoolEvent<'_>) {
        self.events.lock().push(RecordedEvent::from(event));
        self.recorded.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_owned_events() {
        let observer = RecordingObserver::new();
        observer.on_event(&PoolEvent::Acquire);
        observer.on_event(&PoolEvent::Query {
            statement: "SELECT 1",
            connection_id: 1,
        });
        observer.on_event(&PoolEvent::Error(&Error::Abandoned));

        assert_eq!(observer.names(), vec!["acquire", "query", "error"]);
        assert_eq!(
            observer.events()[1],
            RecordedEvent::Query {
                statement: "SELECT 1".into(),
                connection_id: 1
            }
        );
        assert_eq!(observer.errors(), vec![Error::Abandoned]);

        observer.clear();
        assert!(observer.events().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let observer = RecordingObserver::new();
        assert!(!observer.wait_for("close", 1, Duration::from_millis(10)).await);

        observer.on_event(&PoolEvent::Close);
        assert!(observer.wait_for("close", 1, Duration::from_millis(10)).await);
    }
}
