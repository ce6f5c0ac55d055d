//! Versioned aggregate snapshots.
//!
//! A snapshot is the materialized state of one aggregate instance. Its
//! version increases by exactly one per applied event, never skips and never
//! decreases. A snapshot that does not exist yet is treated as having version
//! [`INITIAL_SNAPSHOT_VERSION`].

use crate::aggregate::{AggregateIdentifier, AggregateType, INITIAL_SNAPSHOT_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity, version and auditing fields shared by every snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Aggregate instance.
    pub identifier: Uuid,
    /// Current version, [`INITIAL_SNAPSHOT_VERSION`] before creation.
    pub version: i64,
    /// Actor that created the aggregate.
    pub created_by: Option<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Actor of the most recent change.
    pub last_modified_by: Option<String>,
    /// Time of the most recent change.
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl SnapshotHeader {
    /// Header of an aggregate that has not been created yet.
    #[must_use]
    pub const fn initial(identifier: Uuid) -> Self {
        Self {
            identifier,
            version: INITIAL_SNAPSHOT_VERSION,
            created_by: None,
            created_at: None,
            last_modified_by: None,
            last_modified_at: None,
        }
    }

    /// Whether no event has been applied to this snapshot yet.
    #[must_use]
    pub const fn is_initial(&self) -> bool {
        self.version == INITIAL_SNAPSHOT_VERSION
    }
}

/// State that a write-side service owns and versions.
pub trait VersionedSnapshot: Clone + Send + Sync + 'static {
    /// Identity, version and auditing fields.
    fn header(&self) -> &SnapshotHeader;

    /// Mutable access to the header. Only the snapshot store moves the version.
    fn header_mut(&mut self) -> &mut SnapshotHeader;

    /// Aggregate type tag of this snapshot.
    fn aggregate_type(&self) -> AggregateType;

    /// Identifier of the aggregate rooting this snapshot's ordering domain.
    ///
    /// Root aggregates return their own identifier.
    fn root_context_identifier(&self) -> Uuid;

    /// Identifier of the aggregate revision currently held.
    ///
    /// Returns `None` for a snapshot that has not been created yet.
    fn aggregate_identifier(&self) -> Option<AggregateIdentifier> {
        let header = self.header();
        u64::try_from(header.version)
            .ok()
            .map(|version| AggregateIdentifier::new(self.aggregate_type(), header.identifier, version))
    }
}

/// Auditing fields carried by every aggregate event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditingInformation {
    /// Actor that created the aggregate.
    pub created_by: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Actor of the change this event describes.
    pub last_modified_by: String,
    /// Time of the change this event describes.
    pub last_modified_at: DateTime<Utc>,
}
