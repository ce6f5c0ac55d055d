//! Error taxonomy of the consistency protocol.
//!
//! Every failure the protocol can produce is a variant of [`ConsistencyError`].
//! Callers branch on the variant (or on [`ConsistencyError::is_retryable`] /
//! [`ConsistencyError::is_fatal`]) instead of on error types:
//!
//! | Variant | Meaning | Recovery |
//! |---|---|---|
//! | `FatalOrderingViolation` | version gap > 1 | none, stop the partition consumer |
//! | `OptimisticConflict` | stale write on the online path | reload snapshot, rerun the command |
//! | `AheadOfOnline` | restore pipeline outran the online one | withhold commit, redeliver |
//! | `SnapshotVersionMismatch` | apply produced the wrong version | none, stop the consumer |
//!
//! An idempotent skip during replay is *not* an error; see
//! [`VersionCheck::Skip`](crate::validation::VersionCheck::Skip).

use uuid::Uuid;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ConsistencyError>;

/// Errors raised by the consistency protocol and its storage/transport ports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    /// An event skipped at least one version. Some event was lost or
    /// delivered out of causal order; retrying cannot fix this.
    #[error(
        "Fatal ordering violation for {aggregate_type} {identifier}: snapshot at version {snapshot_version}, event carries version {event_version}"
    )]
    FatalOrderingViolation {
        /// Aggregate type tag
        aggregate_type: String,
        /// Aggregate instance
        identifier: Uuid,
        /// Version of the local snapshot (-1 if none exists)
        snapshot_version: i64,
        /// Version carried by the event
        event_version: u64,
    },

    /// The snapshot has moved on since it was loaded (or the event is a
    /// duplicate) on the online path. The originating command must be
    /// retried against a freshly loaded snapshot.
    #[error(
        "Entity outdated: {aggregate_type} {identifier} is at version {snapshot_version}, event carries version {event_version}"
    )]
    OptimisticConflict {
        /// Aggregate type tag
        aggregate_type: String,
        /// Aggregate instance
        identifier: Uuid,
        /// Version of the local snapshot
        snapshot_version: i64,
        /// Version carried by the event (or expected by the command)
        event_version: u64,
    },

    /// The restore pipeline reached a record the online pipeline has not
    /// committed yet.
    #[error(
        "Restore pipeline ahead of online pipeline on {topic}/{partition}: record offset {offset}, online mark {mark:?}"
    )]
    AheadOfOnline {
        /// Topic of the record
        topic: String,
        /// Partition of the record
        partition: i32,
        /// Offset of the record
        offset: i64,
        /// Last offset processed online, if any
        mark: Option<i64>,
    },

    /// After applying an event, the snapshot version does not equal the
    /// version carried by the event.
    #[error("Snapshot version {snapshot_version} does not equal event version {event_version}")]
    SnapshotVersionMismatch {
        /// Version the snapshot ended up with
        snapshot_version: i64,
        /// Version carried by the event
        event_version: u64,
    },

    /// An online delete event arrived for an aggregate without a snapshot.
    #[error("Tombstone received for {aggregate_type} {identifier} but no snapshot exists")]
    UnexpectedTombstone {
        /// Aggregate type tag
        aggregate_type: String,
        /// Aggregate instance
        identifier: Uuid,
    },

    /// Business transaction scope misuse (nested `RequiresNew`, close without open).
    #[error("Business transaction error: {0}")]
    TransactionScope(String),

    /// A snapshot is missing a field the mapper requires.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// No restore strategy is registered for an aggregate type tag.
    #[error("No restore strategy registered for aggregate type '{0}'")]
    UnknownAggregateType(String),

    /// Two restore strategies were registered for the same aggregate type tag.
    #[error("Restore strategy for aggregate type '{0}' registered twice")]
    DuplicateStrategy(String),

    /// Storage backend failure (buffer, offset marks, snapshots).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing to the log failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Consuming from / committing to the log failed.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ConsistencyError {
    /// Whether the failed operation may succeed when attempted again
    /// (after reloading state or waiting for redelivery).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OptimisticConflict { .. } | Self::AheadOfOnline { .. }
        )
    }

    /// Whether the consumer that observed this error must stop.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FatalOrderingViolation { .. } | Self::SnapshotVersionMismatch { .. }
        )
    }
}
