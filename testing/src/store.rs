//! In-memory [`SnapshotStore`].

#![allow(clippy::unwrap_used)] // Test mock, panicking on poisoned lock is acceptable
#![allow(clippy::missing_panics_doc)] // Test mock

use eventloom_core::aggregate::{AggregateIdentifier, AggregateType};
use eventloom_core::error::{ConsistencyError, Result};
use eventloom_core::mapper::AggregateEvent;
use eventloom_core::snapshot::VersionedSnapshot;
use eventloom_core::snapshot_store::SnapshotStore;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Snapshots of one aggregate type in a `HashMap`.
///
/// Every successful apply is also appended to an audit list so tests can
/// assert that nothing was mutated.
#[derive(Debug)]
pub struct InMemorySnapshotStore<S> {
    aggregate_type: AggregateType,
    snapshots: Arc<RwLock<HashMap<Uuid, S>>>,
    applied: Arc<RwLock<Vec<AggregateIdentifier>>>,
}

impl<S> Clone for InMemorySnapshotStore<S> {
    fn clone(&self) -> Self {
        Self {
            aggregate_type: self.aggregate_type.clone(),
            snapshots: Arc::clone(&self.snapshots),
            applied: Arc::clone(&self.applied),
        }
    }
}

impl<S: VersionedSnapshot> InMemorySnapshotStore<S> {
    /// Create an empty store for `aggregate_type`
    #[must_use]
    pub fn new(aggregate_type: impl Into<AggregateType>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            applied: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Seed a snapshot without going through an event
    pub fn insert(&self, snapshot: S) {
        self.snapshots
            .write()
            .unwrap()
            .insert(snapshot.header().identifier, snapshot);
    }

    /// Snapshot by identifier
    #[must_use]
    pub fn get(&self, identifier: Uuid) -> Option<S> {
        self.snapshots.read().unwrap().get(&identifier).cloned()
    }

    /// Revisions applied so far, in apply order
    #[must_use]
    pub fn applied(&self) -> Vec<AggregateIdentifier> {
        self.applied.read().unwrap().clone()
    }

    /// Number of stored snapshots
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.read().unwrap().len()
    }

    /// Check if no snapshot is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().unwrap().is_empty()
    }
}

impl<S> SnapshotStore for InMemorySnapshotStore<S>
where
    S: VersionedSnapshot + Serialize + DeserializeOwned,
{
    type Snapshot = S;

    fn aggregate_type(&self) -> AggregateType {
        self.aggregate_type.clone()
    }

    async fn find(&self, identifier: Uuid) -> Result<Option<S>> {
        Ok(self.get(identifier))
    }

    async fn apply_event(&self, event: AggregateEvent<S>) -> Result<i64> {
        let version = event.aggregate.header().version;
        self.snapshots
            .write()
            .unwrap()
            .insert(event.aggregate_identifier.identifier(), event.aggregate);
        self.applied.write().unwrap().push(event.aggregate_identifier);
        Ok(version)
    }

    async fn apply_tombstone(&self, identifier: &AggregateIdentifier) -> Result<i64> {
        let version = i64::try_from(identifier.version())
            .map_err(|e| ConsistencyError::Storage(e.to_string()))?;
        self.snapshots.write().unwrap().remove(&identifier.identifier());
        self.applied.write().unwrap().push(identifier.clone());
        Ok(version)
    }
}
