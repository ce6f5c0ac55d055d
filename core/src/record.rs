//! Records as they travel through the log.
//!
//! Every record is keyed by a [`MessageKey`]. The key names the root context
//! (the partitioning unit), the business transaction the record belongs to (if
//! any) and what kind of record it is: an aggregate event, or one of the two
//! marker records that delimit a business transaction.
//!
//! A record whose value is absent is a *tombstone*: the aggregate named by the
//! key has been deleted.

use crate::aggregate::AggregateIdentifier;
use crate::error::{ConsistencyError, Result};
use crate::event::SerializedEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Type tag stored for `TransactionStarted` marker keys.
pub const TRANSACTION_STARTED_TAG: &str = "TRANSACTION_STARTED";

/// Type tag stored for `TransactionFinished` marker keys.
pub const TRANSACTION_FINISHED_TAG: &str = "TRANSACTION_FINISHED";

/// What a record key refers to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// An event (or tombstone) of one aggregate revision.
    Aggregate(AggregateIdentifier),
    /// Opens a business transaction on the log.
    TransactionStarted,
    /// Closes a business transaction on the log.
    TransactionFinished,
}

impl KeyKind {
    /// Type tag persisted alongside buffered keys.
    ///
    /// For aggregate keys this is the aggregate type tag.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Aggregate(identifier) => identifier.aggregate_type().as_str(),
            Self::TransactionStarted => TRANSACTION_STARTED_TAG,
            Self::TransactionFinished => TRANSACTION_FINISHED_TAG,
        }
    }
}

/// Key of every record published by the system.
///
/// # Examples
///
/// ```
/// use eventloom_core::aggregate::AggregateIdentifier;
/// use eventloom_core::record::MessageKey;
/// use uuid::Uuid;
///
/// let project = Uuid::new_v4();
/// let key = MessageKey::aggregate(project, AggregateIdentifier::new("TASK", Uuid::new_v4(), 0));
///
/// assert_eq!(key.root_context_identifier, project);
/// assert!(key.transaction_id.is_none());
/// assert!(!key.is_marker());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    /// Identifier of the aggregate rooting the causal ordering domain.
    /// Used as the partition key.
    pub root_context_identifier: Uuid,

    /// Business transaction this record belongs to.
    pub transaction_id: Option<Uuid>,

    /// Record kind.
    pub kind: KeyKind,
}

impl MessageKey {
    /// Key of an aggregate event outside any business transaction.
    #[must_use]
    pub const fn aggregate(root_context_identifier: Uuid, identifier: AggregateIdentifier) -> Self {
        Self {
            root_context_identifier,
            transaction_id: None,
            kind: KeyKind::Aggregate(identifier),
        }
    }

    /// Key of a `TransactionStarted` marker.
    #[must_use]
    pub const fn transaction_started(root_context_identifier: Uuid, transaction_id: Uuid) -> Self {
        Self {
            root_context_identifier,
            transaction_id: Some(transaction_id),
            kind: KeyKind::TransactionStarted,
        }
    }

    /// Key of a `TransactionFinished` marker.
    #[must_use]
    pub const fn transaction_finished(root_context_identifier: Uuid, transaction_id: Uuid) -> Self {
        Self {
            root_context_identifier,
            transaction_id: Some(transaction_id),
            kind: KeyKind::TransactionFinished,
        }
    }

    /// Stamp the key with a business transaction id.
    #[must_use]
    pub const fn with_transaction_id(mut self, transaction_id: Option<Uuid>) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    /// The aggregate revision this key refers to, if it is an aggregate key.
    #[must_use]
    pub const fn aggregate_identifier(&self) -> Option<&AggregateIdentifier> {
        match &self.kind {
            KeyKind::Aggregate(identifier) => Some(identifier),
            KeyKind::TransactionStarted | KeyKind::TransactionFinished => None,
        }
    }

    /// Whether this key belongs to a transaction marker record.
    #[must_use]
    pub const fn is_marker(&self) -> bool {
        !matches!(self.kind, KeyKind::Aggregate(_))
    }

    /// Encode the key with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ConsistencyError::Serialization(e.to_string()))
    }

    /// Decode a key previously encoded with [`MessageKey::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Serialization`] if the bytes do not decode.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| ConsistencyError::Serialization(format!("Invalid message key: {e}")))
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            KeyKind::Aggregate(identifier) => write!(f, "{identifier}")?,
            KeyKind::TransactionStarted => write!(f, "{TRANSACTION_STARTED_TAG}")?,
            KeyKind::TransactionFinished => write!(f, "{TRANSACTION_FINISHED_TAG}")?,
        }
        if let Some(transaction_id) = self.transaction_id {
            write!(f, " (tx {transaction_id})")?;
        }
        Ok(())
    }
}

/// One record read from (or about to be written to) a log partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    /// Topic the record lives in.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Record key.
    pub key: MessageKey,
    /// Payload; `None` for a tombstone.
    pub value: Option<SerializedEvent>,
    /// Log timestamp assigned on produce.
    pub produced_at: DateTime<Utc>,
}

impl EventRecord {
    /// Whether this record signals deletion of its aggregate.
    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Business transaction the record belongs to.
    #[must_use]
    pub const fn transaction_id(&self) -> Option<Uuid> {
        self.key.transaction_id
    }

    /// `topic/partition@offset`, used as a log field.
    #[must_use]
    pub fn position(&self) -> String {
        format!("{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn key_survives_encoding() {
        let key = MessageKey::aggregate(
            Uuid::new_v4(),
            AggregateIdentifier::new("TASK", Uuid::new_v4(), 4),
        )
        .with_transaction_id(Some(Uuid::new_v4()));

        let decoded = MessageKey::from_bytes(&key.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn corrupted_key_is_a_serialization_error() {
        let result = MessageKey::from_bytes(&[0xFF, 0xFF]);
        assert!(matches!(result, Err(ConsistencyError::Serialization(_))));
    }

    #[test]
    fn marker_keys_carry_transaction_id_and_tag() {
        let tx = Uuid::new_v4();
        let started = MessageKey::transaction_started(Uuid::nil(), tx);
        let finished = MessageKey::transaction_finished(Uuid::nil(), tx);

        assert!(started.is_marker());
        assert!(finished.is_marker());
        assert_eq!(started.transaction_id, Some(tx));
        assert_eq!(started.kind.type_tag(), TRANSACTION_STARTED_TAG);
        assert_eq!(finished.kind.type_tag(), TRANSACTION_FINISHED_TAG);
        assert!(started.aggregate_identifier().is_none());
    }

    #[test]
    fn aggregate_key_tag_is_aggregate_type() {
        let key = MessageKey::aggregate(Uuid::nil(), AggregateIdentifier::new("PROJECT", Uuid::nil(), 0));
        assert_eq!(key.kind.type_tag(), "PROJECT");
    }
}
