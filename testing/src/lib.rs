//! # Eventloom Testing
//!
//! In-memory doubles and fixtures for testing Eventloom producers and
//! consumers without `PostgreSQL` or a broker.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic time
//! - [`InMemoryTransactionEventBuffer`]: business transaction buffer
//! - [`InMemoryOffsetMarkStore`]: replay offset marks
//! - [`RecordingEventPublisher`]: a single-partition log per topic
//! - [`InMemorySnapshotStore`]: snapshots of one aggregate type
//! - [`fixtures`]: a sample `Task` aggregate and record builders
//!
//! ## Example
//!
//! ```
//! use eventloom_core::replay::ReplayCoordinator;
//! use eventloom_testing::InMemoryOffsetMarkStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let coordinator = ReplayCoordinator::new(Arc::new(InMemoryOffsetMarkStore::new()));
//! coordinator.record_committed("task", 0, 10).await.unwrap();
//!
//! assert!(coordinator.ensure_not_ahead("task", 0, 10).await.is_ok());
//! assert!(coordinator.ensure_not_ahead("task", 0, 11).await.is_err());
//! # }
//! ```

use chrono::{DateTime, Utc};
use eventloom_core::environment::Clock;

pub mod buffer;
pub mod fixtures;
pub mod marks;
pub mod publisher;
pub mod store;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use eventloom_testing::mocks::FixedClock;
    /// use eventloom_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// A clock `duration` later than this one.
        #[must_use]
        pub fn advanced_by(&self, duration: chrono::Duration) -> Self {
            Self::new(self.time + duration)
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use buffer::InMemoryTransactionEventBuffer;
pub use marks::InMemoryOffsetMarkStore;
pub use mocks::{FixedClock, test_clock};
pub use publisher::RecordingEventPublisher;
pub use store::InMemorySnapshotStore;
