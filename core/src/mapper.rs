//! Turning a mutated snapshot into the next versioned outbound event.
//!
//! The mapper is pure: the actor and the time are passed in, nothing is
//! published and the input snapshot is not modified.

use crate::aggregate::{AggregateIdentifier, INITIAL_SNAPSHOT_VERSION};
use crate::error::{ConsistencyError, Result};
use crate::event::SerializedEvent;
use crate::record::MessageKey;
use crate::snapshot::{AuditingInformation, VersionedSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Outbound event describing one aggregate revision.
///
/// Carries the complete state of the aggregate after the change, so consumers
/// can apply it without knowing the command that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateEvent<S> {
    /// Event type tag (e.g. `"TaskUpdated.v1"`).
    pub event_type: String,
    /// Aggregate revision this event creates.
    pub aggregate_identifier: AggregateIdentifier,
    /// Partition key.
    pub root_context_identifier: Uuid,
    /// Auditing fields after the change.
    pub auditing: AuditingInformation,
    /// Aggregate state after the change; its header version equals
    /// `aggregate_identifier.version()`.
    pub aggregate: S,
}

impl<S: Serialize> AggregateEvent<S> {
    /// Key of the record carrying this event.
    #[must_use]
    pub fn key(&self, transaction_id: Option<Uuid>) -> MessageKey {
        MessageKey::aggregate(self.root_context_identifier, self.aggregate_identifier.clone())
            .with_transaction_id(transaction_id)
    }

    /// Payload of the record carrying this event.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Serialization`] if encoding fails.
    pub fn to_serialized(&self) -> Result<SerializedEvent> {
        let data = bincode::serialize(self).map_err(|e| {
            ConsistencyError::Serialization(format!("Failed to encode {}: {e}", self.event_type))
        })?;
        Ok(SerializedEvent::new(self.event_type.clone(), data))
    }
}

impl<S: DeserializeOwned> AggregateEvent<S> {
    /// Decode an event from a record payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Serialization`] if the payload does not decode.
    pub fn from_serialized(event: &SerializedEvent) -> Result<Self> {
        event.decode()
    }
}

/// Maps snapshots to outbound events.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotEventMapper;

impl SnapshotEventMapper {
    /// Create a mapper.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Build the event for the next revision of `snapshot`.
    ///
    /// The event version is `snapshot.version + 1`. `last_modified_*` are set
    /// to `actor`/`now`; `created_*` are preserved, or set to `actor`/`now`
    /// for a snapshot that has not been created yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::InvalidSnapshot`] if the version is below
    /// the initial version or an existing snapshot lacks its creation fields.
    pub fn to_event<S: VersionedSnapshot>(
        &self,
        snapshot: &S,
        event_type: impl Into<String>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<AggregateEvent<S>> {
        let header = snapshot.header();
        let next_version = next_version(snapshot)?;

        let (created_by, created_at) = if header.is_initial() {
            (actor.to_string(), now)
        } else {
            match (&header.created_by, header.created_at) {
                (Some(by), Some(at)) => (by.clone(), at),
                _ => {
                    return Err(ConsistencyError::InvalidSnapshot(format!(
                        "{} {} at version {} has no creation auditing fields",
                        snapshot.aggregate_type(),
                        header.identifier,
                        header.version
                    )));
                }
            }
        };

        let mut aggregate = snapshot.clone();
        {
            let header = aggregate.header_mut();
            header.version = i64::try_from(next_version).map_err(|_| {
                ConsistencyError::InvalidSnapshot(format!("version {next_version} out of range"))
            })?;
            header.created_by = Some(created_by.clone());
            header.created_at = Some(created_at);
            header.last_modified_by = Some(actor.to_string());
            header.last_modified_at = Some(now);
        }

        Ok(AggregateEvent {
            event_type: event_type.into(),
            aggregate_identifier: AggregateIdentifier::new(
                snapshot.aggregate_type(),
                header.identifier,
                next_version,
            ),
            root_context_identifier: snapshot.root_context_identifier(),
            auditing: AuditingInformation {
                created_by,
                created_at,
                last_modified_by: actor.to_string(),
                last_modified_at: now,
            },
            aggregate,
        })
    }

    /// Key of the tombstone that deletes `snapshot`, at version
    /// `snapshot.version + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::InvalidSnapshot`] for a snapshot that has
    /// not been created yet.
    pub fn tombstone_key<S: VersionedSnapshot>(&self, snapshot: &S) -> Result<MessageKey> {
        if snapshot.header().is_initial() {
            return Err(ConsistencyError::InvalidSnapshot(format!(
                "cannot delete {} {}: it was never created",
                snapshot.aggregate_type(),
                snapshot.header().identifier
            )));
        }
        Ok(MessageKey::aggregate(
            snapshot.root_context_identifier(),
            AggregateIdentifier::new(
                snapshot.aggregate_type(),
                snapshot.header().identifier,
                next_version(snapshot)?,
            ),
        ))
    }
}

fn next_version<S: VersionedSnapshot>(snapshot: &S) -> Result<u64> {
    let version = snapshot.header().version;
    if version < INITIAL_SNAPSHOT_VERSION {
        return Err(ConsistencyError::InvalidSnapshot(format!(
            "{} {} has invalid version {version}",
            snapshot.aggregate_type(),
            snapshot.header().identifier
        )));
    }
    u64::try_from(version + 1).map_err(|_| {
        ConsistencyError::InvalidSnapshot(format!("version {version} cannot be incremented"))
    })
}
