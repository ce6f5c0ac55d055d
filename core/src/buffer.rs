//! Parking area for records of business transactions that are not complete yet.
//!
//! The log delivers the events of a business transaction as independent
//! records. A consumer parks each of them in a [`TransactionEventBuffer`] until
//! the `TransactionFinished` marker arrives, then releases the whole group in
//! offset order and removes it.
//!
//! Rows are partitioned by `owner_processor_name`: independent consumers
//! buffering the same transaction never see or delete each other's rows.
//!
//! # Implementations
//!
//! - `InMemoryTransactionEventBuffer` in `eventloom-testing`
//! - `PostgresTransactionEventBuffer` in `eventloom-postgres`

use crate::error::Result;
use crate::event::SerializedEvent;
use crate::record::{EventRecord, MessageKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// One inbound record parked until its business transaction completes.
///
/// Unique on `(transaction_id, owner_processor_name, offset)`. Never updated
/// in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedTransactionEvent {
    /// When the consumer parked the record.
    pub received_at: DateTime<Utc>,
    /// Log timestamp of the record.
    pub produced_at: DateTime<Utc>,
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Business transaction the record belongs to.
    pub transaction_id: Uuid,
    /// Encoded [`MessageKey`].
    pub raw_key: Vec<u8>,
    /// Payload bytes; `None` for a tombstone.
    pub raw_value: Option<Vec<u8>>,
    /// Aggregate type tag or marker tag of the key.
    pub key_type_tag: String,
    /// Event type of the payload; `None` for a tombstone.
    pub value_type_tag: Option<String>,
    /// Consumer that owns this row.
    pub owner_processor_name: String,
}

impl BufferedTransactionEvent {
    /// Park `record` on behalf of `owner_processor_name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Serialization`](crate::error::ConsistencyError::Serialization)
    /// if the key cannot be encoded.
    pub fn from_record(
        record: &EventRecord,
        transaction_id: Uuid,
        owner_processor_name: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            received_at,
            produced_at: record.produced_at,
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            transaction_id,
            raw_key: record.key.to_bytes()?,
            raw_value: record.value.as_ref().map(|v| v.data.clone()),
            key_type_tag: record.key.kind.type_tag().to_string(),
            value_type_tag: record.value.as_ref().map(|v| v.event_type.clone()),
            owner_processor_name: owner_processor_name.into(),
        })
    }

    /// Rebuild the original record.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Serialization`](crate::error::ConsistencyError::Serialization)
    /// if the stored key does not decode.
    pub fn to_record(&self) -> Result<EventRecord> {
        let value = match (&self.value_type_tag, &self.raw_value) {
            (Some(event_type), Some(data)) => Some(SerializedEvent::new(event_type.clone(), data.clone())),
            _ => None,
        };
        Ok(EventRecord {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
            key: MessageKey::from_bytes(&self.raw_key)?,
            value,
            produced_at: self.produced_at,
        })
    }
}

/// Callback run by [`TransactionEventBuffer::release`] with the buffered
/// events of one transaction in offset order.
pub type ReleaseFn<'a> = Box<
    dyn FnOnce(Vec<BufferedTransactionEvent>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>
        + Send
        + 'a,
>;

/// Storage port for parked business-transaction records.
///
/// Safe under concurrent inserts from independent consumers.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so listeners can share an
/// `Arc<dyn TransactionEventBuffer>`.
pub trait TransactionEventBuffer: Send + Sync {
    /// Number of rows (all owners) received before `before`.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn count_older_than(
        &self,
        before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Oldest buffered row of `owner_processor_name` by offset.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn first_by_offset<'a>(
        &'a self,
        owner_processor_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BufferedTransactionEvent>>> + Send + 'a>>;

    /// Oldest buffered row of `owner_processor_name` on one partition.
    ///
    /// Offsets are only comparable within a partition; this is the
    /// head-of-line row that holds back the replay offset mark there.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn first_on_partition<'a>(
        &'a self,
        owner_processor_name: &'a str,
        topic: &'a str,
        partition: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BufferedTransactionEvent>>> + Send + 'a>>;

    /// All rows of one transaction for one owner, offset ascending.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn all_for_transaction<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BufferedTransactionEvent>>> + Send + 'a>>;

    /// Whether the row at `offset` is already buffered.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn contains<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    /// Delete all rows of one transaction for one owner; returns how many.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn remove_all_for_transaction<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;

    /// Park a record. Saving a row that already exists is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn save<'a>(
        &'a self,
        event: &'a BufferedTransactionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Delete every row.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Hand all rows of one transaction to `apply` in offset order and delete
    /// them if `apply` succeeds. Returns the number of released rows; `apply`
    /// is not called when nothing is buffered.
    ///
    /// The provided implementation is read, apply, delete. Backends with
    /// transactions override it so concurrent releasers serialize and a failed
    /// `apply` leaves the rows in place.
    ///
    /// # Errors
    ///
    /// Errors of `apply` or of the backend. Rows are kept on error.
    fn release<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
        apply: ReleaseFn<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>> {
        Box::pin(async move {
            let events = self
                .all_for_transaction(transaction_id, owner_processor_name)
                .await?;
            if events.is_empty() {
                return Ok(0);
            }

            let released = events.len();
            apply(events).await?;
            self.remove_all_for_transaction(transaction_id, owner_processor_name)
                .await?;
            Ok(released)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::aggregate::AggregateIdentifier;

    fn record(value: Option<SerializedEvent>) -> EventRecord {
        EventRecord {
            topic: "task".to_string(),
            partition: 3,
            offset: 42,
            key: MessageKey::aggregate(Uuid::new_v4(), AggregateIdentifier::new("TASK", Uuid::new_v4(), 1))
                .with_transaction_id(Some(Uuid::new_v4())),
            value,
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn buffered_event_rebuilds_the_record() {
        let original = record(Some(SerializedEvent::new("TaskUpdated.v1", vec![1, 2, 3])));
        let tx = original.transaction_id().unwrap();

        let buffered = BufferedTransactionEvent::from_record(&original, tx, "task-service", Utc::now()).unwrap();
        assert_eq!(buffered.key_type_tag, "TASK");
        assert_eq!(buffered.value_type_tag.as_deref(), Some("TaskUpdated.v1"));

        assert_eq!(buffered.to_record().unwrap(), original);
    }

    #[test]
    fn buffered_tombstone_has_no_value() {
        let original = record(None);
        let tx = original.transaction_id().unwrap();

        let buffered = BufferedTransactionEvent::from_record(&original, tx, "task-service", Utc::now()).unwrap();
        assert!(buffered.raw_value.is_none());
        assert!(buffered.value_type_tag.is_none());
        assert!(buffered.to_record().unwrap().is_tombstone());
    }
}
