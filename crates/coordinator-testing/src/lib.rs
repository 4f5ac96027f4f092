//! # conn-coordinator-testing
//!
//! Test infrastructure for conn-coordinator.
//!
//! ## Features
//!
//! - Scriptable in-memory adapter (no database required)
//! - Runtime failure injection: refused connections, failing statements,
//!   failing reset statements
//! - Observer that records every coordinator event
//! - Tracing setup for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use conn_coordinator_testing::{MockAdapter, MockResponse, TestCoordinator};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let adapter = MockAdapter::builder()
//!         .with_response("SELECT 1", MockResponse::scalar_int(1))
//!         .build();
//!     let t = TestCoordinator::new(adapter, 2).unwrap();
//!
//!     t.coordinator.query("SELECT 1", ()).await.unwrap();
//!     assert_eq!(t.events.names(), vec!["acquire", "query", "release"]);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_adapter;
pub mod observer;

pub use fixtures::{TestCoordinator, init_tracing};
pub use mock_adapter::{
    Executed, MockAdapter, MockAdapterBuilder, MockConnection, MockOutput, MockResponse, MockState,
};
pub use observer::{RecordedEvent, RecordingObserver};
