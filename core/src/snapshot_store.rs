//! Applying inbound aggregate records to local snapshots.

use crate::aggregate::{AggregateIdentifier, AggregateType, INITIAL_SNAPSHOT_VERSION};
use crate::error::{ConsistencyError, Result};
use crate::mapper::AggregateEvent;
use crate::record::EventRecord;
use crate::replay::RestoreStrategy;
use crate::snapshot::VersionedSnapshot;
use crate::validation::{EventVersionValidator, ValidationMode, VersionCheck};
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Local snapshots of one aggregate type.
///
/// Implementors provide storage access; [`SnapshotStore::handle_record`]
/// provides the consistency checks around it.
pub trait SnapshotStore: Send + Sync {
    /// Snapshot type held by this store.
    type Snapshot: VersionedSnapshot + Serialize + DeserializeOwned;

    /// Aggregate type tag of the records this store consumes.
    fn aggregate_type(&self) -> AggregateType;

    /// Load a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn find(&self, identifier: Uuid) -> impl Future<Output = Result<Option<Self::Snapshot>>> + Send;

    /// Create or update the snapshot carried by `event`; returns the stored version.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn apply_event(
        &self,
        event: AggregateEvent<Self::Snapshot>,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Delete a snapshot; returns the version of the deletion.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn apply_tombstone(
        &self,
        identifier: &AggregateIdentifier,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Validate and apply one aggregate record.
    ///
    /// Returns [`VersionCheck::Apply`] if the record was applied and
    /// [`VersionCheck::Skip`] if it was a replayed duplicate. Marker records
    /// are skipped.
    ///
    /// # Errors
    ///
    /// - [`ConsistencyError::UnexpectedTombstone`]: online tombstone for a missing snapshot
    /// - [`ConsistencyError::OptimisticConflict`]: stale record online
    /// - [`ConsistencyError::FatalOrderingViolation`]: version gap
    /// - [`ConsistencyError::SnapshotVersionMismatch`]: the store did not end
    ///   up at the record's version
    fn handle_record(
        &self,
        record: &EventRecord,
        mode: ValidationMode,
    ) -> impl Future<Output = Result<VersionCheck>> + Send {
        async move {
            let Some(identifier) = record.key.aggregate_identifier() else {
                return Ok(VersionCheck::Skip);
            };

            let current = self.find(identifier.identifier()).await?;

            if record.is_tombstone() && current.is_none() {
                return match mode {
                    ValidationMode::Restore => {
                        tracing::debug!(aggregate = %identifier, "Duplicate tombstone for missing snapshot, skipping");
                        Ok(VersionCheck::Skip)
                    }
                    ValidationMode::Online => Err(ConsistencyError::UnexpectedTombstone {
                        aggregate_type: identifier.aggregate_type().to_string(),
                        identifier: identifier.identifier(),
                    }),
                };
            }

            let snapshot_version = current.as_ref().map(|s| s.header().version);
            let check = EventVersionValidator::new().check(snapshot_version, identifier, mode);
            match check {
                VersionCheck::Apply => {}
                VersionCheck::Skip => return Ok(VersionCheck::Skip),
                VersionCheck::Conflict | VersionCheck::FatalGap => {
                    check.into_result(
                        identifier,
                        snapshot_version.unwrap_or(INITIAL_SNAPSHOT_VERSION),
                    )?;
                }
            }

            let new_version = match &record.value {
                None => self.apply_tombstone(identifier).await?,
                Some(value) => {
                    let event = AggregateEvent::<Self::Snapshot>::from_serialized(value)?;
                    self.apply_event(event).await?
                }
            };

            if u64::try_from(new_version).ok() != Some(identifier.version()) {
                tracing::error!(
                    aggregate = %identifier,
                    new_version,
                    "Snapshot version does not match event version after apply"
                );
                return Err(ConsistencyError::SnapshotVersionMismatch {
                    snapshot_version: new_version,
                    event_version: identifier.version(),
                });
            }

            Ok(VersionCheck::Apply)
        }
    }
}

/// Restores records into a [`SnapshotStore`] in replay-tolerant mode.
pub struct SnapshotRestoreStrategy<St> {
    store: Arc<St>,
}

impl<St> SnapshotRestoreStrategy<St> {
    /// Restore into `store`.
    #[must_use]
    pub const fn new(store: Arc<St>) -> Self {
        Self { store }
    }
}

impl<St> RestoreStrategy for SnapshotRestoreStrategy<St>
where
    St: SnapshotStore + 'static,
{
    fn restore<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.store.handle_record(record, ValidationMode::Restore).await?;
            Ok(())
        })
    }
}
