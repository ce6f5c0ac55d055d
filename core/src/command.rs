//! Command handler pipeline on the write side.
//!
//! A command handler loads a snapshot, checks the version the caller based its
//! decision on, applies the changes, and publishes the next versioned event
//! (or a tombstone). Events published while a business transaction is active
//! are stamped with its id.
//!
//! # Example
//!
//! ```ignore
//! let published = CommandHandler::of(task)
//!     .assert_version_matches(command.version)?
//!     .apply_changes(|task| task.name = command.name)
//!     .emit_event("TaskUpdated.v1")
//!     .if_snapshot_was_changed()
//!     .to(&publisher, "task", &actor, &clock, Some(&scope))
//!     .await?;
//! ```
//!
//! On [`ConsistencyError::OptimisticConflict`] the whole command, including
//! the snapshot load, is rerun by `retry_on_conflict` in `eventloom-runtime`.

use crate::aggregate::AggregateIdentifier;
use crate::business_transaction::BusinessTransactionScope;
use crate::environment::Clock;
use crate::error::{ConsistencyError, Result};
use crate::mapper::SnapshotEventMapper;
use crate::publisher::EventPublisher;
use crate::snapshot::VersionedSnapshot;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Emission {
    Nothing,
    Event {
        event_type: String,
        only_if_changed: bool,
    },
    Tombstone,
}

/// Fluent pipeline around one command invocation.
#[derive(Clone, Debug)]
pub struct CommandHandler<S> {
    loaded: S,
    snapshot: S,
    emission: Emission,
}

impl<S> CommandHandler<S>
where
    S: VersionedSnapshot + PartialEq + Serialize,
{
    /// Start from a loaded snapshot.
    #[must_use]
    pub fn of(snapshot: S) -> Self {
        Self {
            loaded: snapshot.clone(),
            snapshot,
            emission: Emission::Nothing,
        }
    }

    /// Start from a snapshot that does not exist yet (initial version).
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::InvalidSnapshot`] if `snapshot` already has
    /// a version.
    pub fn new(snapshot: S) -> Result<Self> {
        if !snapshot.header().is_initial() {
            return Err(ConsistencyError::InvalidSnapshot(format!(
                "{} {} already exists at version {}",
                snapshot.aggregate_type(),
                snapshot.header().identifier,
                snapshot.header().version
            )));
        }
        Ok(Self::of(snapshot))
    }

    /// Fail with a conflict unless the snapshot is at `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::OptimisticConflict`] on mismatch.
    pub fn assert_version_matches(self, expected: u64) -> Result<Self> {
        let header = self.snapshot.header();
        if u64::try_from(header.version).ok() == Some(expected) {
            return Ok(self);
        }
        tracing::debug!(
            aggregate_type = %self.snapshot.aggregate_type(),
            identifier = %header.identifier,
            actual = header.version,
            expected,
            "Command based on outdated snapshot"
        );
        Err(ConsistencyError::OptimisticConflict {
            aggregate_type: self.snapshot.aggregate_type().to_string(),
            identifier: header.identifier,
            snapshot_version: header.version,
            event_version: expected,
        })
    }

    /// Mutate the snapshot.
    #[must_use]
    pub fn apply_changes(mut self, change: impl FnOnce(&mut S)) -> Self {
        change(&mut self.snapshot);
        self
    }

    /// Publish an event of `event_type` for the changed snapshot.
    #[must_use]
    pub fn emit_event(mut self, event_type: impl Into<String>) -> Self {
        self.emission = Emission::Event {
            event_type: event_type.into(),
            only_if_changed: false,
        };
        self
    }

    /// Only publish the event if the changes altered the snapshot.
    #[must_use]
    pub fn if_snapshot_was_changed(mut self) -> Self {
        if let Emission::Event { only_if_changed, .. } = &mut self.emission {
            *only_if_changed = true;
        }
        self
    }

    /// Publish a tombstone deleting the aggregate.
    #[must_use]
    pub fn emit_tombstone(mut self) -> Self {
        self.emission = Emission::Tombstone;
        self
    }

    /// The snapshot with all changes applied.
    #[must_use]
    pub const fn snapshot(&self) -> &S {
        &self.snapshot
    }

    /// Publish to `topic`. Returns the identifier of the published revision,
    /// or `None` if nothing was emitted.
    ///
    /// # Errors
    ///
    /// Mapping or publish failures.
    pub async fn to(
        self,
        publisher: &dyn EventPublisher,
        topic: &str,
        actor: &str,
        clock: &dyn Clock,
        scope: Option<&BusinessTransactionScope>,
    ) -> Result<Option<AggregateIdentifier>> {
        let transaction_id = scope.and_then(BusinessTransactionScope::current_transaction_id);
        let mapper = SnapshotEventMapper::new();

        match self.emission {
            Emission::Nothing => Ok(None),
            Emission::Event {
                only_if_changed: true,
                ..
            } if self.snapshot == self.loaded => {
                tracing::debug!(
                    aggregate_type = %self.snapshot.aggregate_type(),
                    identifier = %self.snapshot.header().identifier,
                    "Snapshot unchanged, no event emitted"
                );
                Ok(None)
            }
            Emission::Event { event_type, .. } => {
                let event = mapper.to_event(&self.snapshot, event_type, actor, clock.now())?;
                let key = event.key(transaction_id);
                let value = event.to_serialized()?;
                publisher.publish(topic, &key, Some(&value)).await?;
                tracing::info!(
                    aggregate = %event.aggregate_identifier,
                    event_type = %event.event_type,
                    transaction_id = ?transaction_id,
                    "Event published"
                );
                Ok(Some(event.aggregate_identifier))
            }
            Emission::Tombstone => {
                let key = mapper.tombstone_key(&self.snapshot)?.with_transaction_id(transaction_id);
                publisher.publish(topic, &key, None).await?;
                tracing::info!(aggregate = %key, "Tombstone published");
                Ok(key.aggregate_identifier().cloned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::aggregate::AggregateType;
    use crate::business_transaction::Propagation;
    use crate::event::SerializedEvent;
    use crate::record::MessageKey;
    use crate::snapshot::SnapshotHeader;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::Deserialize;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Company {
        header: SnapshotHeader,
        name: String,
    }

    impl VersionedSnapshot for Company {
        fn header(&self) -> &SnapshotHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut SnapshotHeader {
            &mut self.header
        }

        fn aggregate_type(&self) -> AggregateType {
            AggregateType::new("COMPANY")
        }

        fn root_context_identifier(&self) -> Uuid {
            self.header.identifier
        }
    }

    #[derive(Default)]
    struct Capture {
        records: Mutex<Vec<(MessageKey, Option<SerializedEvent>)>>,
    }

    impl EventPublisher for Capture {
        fn publish<'a>(
            &'a self,
            _topic: &'a str,
            key: &'a MessageKey,
            value: Option<&'a SerializedEvent>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            self.records.lock().unwrap().push((key.clone(), value.cloned()));
            Box::pin(async { Ok(()) })
        }
    }

    struct Fixed(DateTime<Utc>);

    impl Clock for Fixed {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn company(version: i64) -> Company {
        let created = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        Company {
            header: SnapshotHeader {
                identifier: Uuid::new_v4(),
                version,
                created_by: Some("alice".to_string()),
                created_at: Some(created),
                last_modified_by: Some("alice".to_string()),
                last_modified_at: Some(created),
            },
            name: "Acme".to_string(),
        }
    }

    fn clock() -> Fixed {
        Fixed(Utc.with_ymd_and_hms(2025, 3, 2, 8, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn changed_snapshot_publishes_next_version() {
        let publisher = Capture::default();
        let published = CommandHandler::of(company(2))
            .assert_version_matches(2)
            .unwrap()
            .apply_changes(|c| c.name = "Acme GmbH".to_string())
            .emit_event("CompanyUpdated.v1")
            .if_snapshot_was_changed()
            .to(&publisher, "company", "bob", &clock(), None)
            .await
            .unwrap();

        assert_eq!(published.unwrap().version(), 3);
        let records = publisher.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].0.transaction_id.is_none());
        assert_eq!(records[0].1.as_ref().unwrap().event_type, "CompanyUpdated.v1");
    }

    #[tokio::test]
    async fn unchanged_snapshot_publishes_nothing() {
        let publisher = Capture::default();
        let published = CommandHandler::of(company(2))
            .apply_changes(|c| c.name = "Acme".to_string())
            .emit_event("CompanyUpdated.v1")
            .if_snapshot_was_changed()
            .to(&publisher, "company", "bob", &clock(), None)
            .await
            .unwrap();

        assert!(published.is_none());
        assert!(publisher.records.lock().unwrap().is_empty());
    }

    #[test]
    fn outdated_version_is_a_conflict() {
        let result = CommandHandler::of(company(4)).assert_version_matches(3);
        assert!(matches!(result, Err(ConsistencyError::OptimisticConflict { .. })));
    }

    #[test]
    fn new_rejects_existing_snapshot() {
        assert!(CommandHandler::new(company(0)).is_err());
    }

    #[tokio::test]
    async fn tombstone_is_stamped_with_active_transaction() {
        let publisher = Capture::default();
        let scope = BusinessTransactionScope::new();
        let tx = scope.open(Propagation::Required).unwrap();

        let published = CommandHandler::of(company(7))
            .emit_tombstone()
            .to(&publisher, "company", "bob", &clock(), Some(&scope))
            .await
            .unwrap();

        assert_eq!(published.unwrap().version(), 8);
        let records = publisher.records.lock().unwrap();
        assert_eq!(records[0].0.transaction_id, Some(tx));
        assert!(records[0].1.is_none());
    }
}
