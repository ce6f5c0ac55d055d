//! In-memory [`TransactionEventBuffer`].

#![allow(clippy::unwrap_used)] // Test mock, panicking on poisoned lock is acceptable
#![allow(clippy::missing_panics_doc)] // Test mock

use chrono::{DateTime, Utc};
use eventloom_core::buffer::{BufferedTransactionEvent, TransactionEventBuffer};
use eventloom_core::error::Result;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

type RowKey = (String, Uuid, i64);

/// Buffer rows in a `BTreeMap` keyed by (owner, transaction, offset), so
/// iteration within one transaction is offset ordered.
///
/// # Example
///
/// ```
/// use eventloom_testing::InMemoryTransactionEventBuffer;
///
/// let buffer = InMemoryTransactionEventBuffer::new();
/// assert!(buffer.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryTransactionEventBuffer {
    rows: Arc<RwLock<BTreeMap<RowKey, BufferedTransactionEvent>>>,
}

impl InMemoryTransactionEventBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows across all owners
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Check if nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }

    /// Every row, ordered by owner, transaction and offset
    #[must_use]
    pub fn rows(&self) -> Vec<BufferedTransactionEvent> {
        self.rows.read().unwrap().values().cloned().collect()
    }
}

fn row_key(event: &BufferedTransactionEvent) -> RowKey {
    (
        event.owner_processor_name.clone(),
        event.transaction_id,
        event.offset,
    )
}

impl TransactionEventBuffer for InMemoryTransactionEventBuffer {
    fn count_older_than(
        &self,
        before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        Box::pin(async move {
            let count = self
                .rows
                .read()
                .unwrap()
                .values()
                .filter(|row| row.received_at < before)
                .count();
            Ok(count as u64)
        })
    }

    fn first_by_offset<'a>(
        &'a self,
        owner_processor_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BufferedTransactionEvent>>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .rows
                .read()
                .unwrap()
                .values()
                .filter(|row| row.owner_processor_name == owner_processor_name)
                .min_by_key(|row| row.offset)
                .cloned())
        })
    }

    fn first_on_partition<'a>(
        &'a self,
        owner_processor_name: &'a str,
        topic: &'a str,
        partition: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BufferedTransactionEvent>>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .rows
                .read()
                .unwrap()
                .values()
                .filter(|row| {
                    row.owner_processor_name == owner_processor_name
                        && row.topic == topic
                        && row.partition == partition
                })
                .min_by_key(|row| row.offset)
                .cloned())
        })
    }

    fn all_for_transaction<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BufferedTransactionEvent>>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .rows
                .read()
                .unwrap()
                .values()
                .filter(|row| {
                    row.transaction_id == transaction_id
                        && row.owner_processor_name == owner_processor_name
                })
                .cloned()
                .collect())
        })
    }

    fn contains<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        let key = (owner_processor_name.to_string(), transaction_id, offset);
        Box::pin(async move { Ok(self.rows.read().unwrap().contains_key(&key)) })
    }

    fn remove_all_for_transaction<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(async move {
            let mut rows = self.rows.write().unwrap();
            let before = rows.len();
            rows.retain(|(owner, tx, _), _| {
                !(*tx == transaction_id && owner == owner_processor_name)
            });
            Ok((before - rows.len()) as u64)
        })
    }

    fn save<'a>(
        &'a self,
        event: &'a BufferedTransactionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.rows
                .write()
                .unwrap()
                .entry(row_key(event))
                .or_insert_with(|| event.clone());
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.rows.write().unwrap().clear();
            Ok(())
        })
    }
}
