//! # Eventloom Core
//!
//! Consistency protocol for event-sourced services that communicate through
//! an append-only, partitioned log.
//!
//! Each service owns write-side aggregates whose changes are published as
//! versioned events, and read-side state rebuilt by replaying those events.
//! This crate keeps both sides consistent:
//!
//! - **Version validation** ([`validation`]): may an incoming event be applied
//!   to the local snapshot?
//! - **Business transactions** ([`business_transaction`], [`buffer`]): several
//!   causally related events, possibly of different aggregates, are applied
//!   together even though the log delivers them as independent records.
//! - **Replay coordination** ([`replay`]): a restore pipeline rebuilds a
//!   database from the log without getting ahead of the online pipeline.
//!
//! ## Control Flow
//!
//! ```text
//! command ─► CommandHandler ─► SnapshotEventMapper ─► EventPublisher ─► log
//!                                                                        │
//!            ┌───────────────────────────────────────────────────────────┤
//!            ▼                                                           ▼
//!   online consumer                                             restore consumer
//!   BusinessTransactionAwareListener                            ReplayCoordinator
//!   (buffer until TransactionFinished)                          (stay behind online)
//!            │                                                           │
//!            ▼                                                           ▼
//!   SnapshotStore::handle_record ◄── EventVersionValidator ──► RestoreDispatcher
//! ```
//!
//! The core treats payloads as opaque bytes with a type tag. Storage and
//! transport live in `eventloom-postgres` and `eventloom-redpanda`; the
//! listener and pipelines live in `eventloom-runtime`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;

pub mod aggregate;
pub mod buffer;
pub mod business_transaction;
pub mod command;
pub mod consumer;
pub mod error;
pub mod event;
pub mod mapper;
pub mod publisher;
pub mod record;
pub mod replay;
pub mod snapshot;
pub mod snapshot_store;
pub mod validation;

pub use aggregate::{AggregateIdentifier, AggregateType, INITIAL_SNAPSHOT_VERSION};
pub use error::{ConsistencyError, Result};
pub use validation::{EventVersionValidator, ValidationMode, VersionCheck};

/// Environment module - injected dependencies
///
/// External effects the protocol needs are abstracted behind traits so tests
/// can substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use eventloom_core::environment::{Clock, SystemClock};
    ///
    /// let before = chrono::Utc::now();
    /// assert!(SystemClock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
