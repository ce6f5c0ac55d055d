//! `PostgreSQL` [`TransactionEventBuffer`].
//!
//! ```sql
//! CREATE TABLE business_transaction_events (
//!     transaction_id UUID NOT NULL,
//!     owner_processor_name TEXT NOT NULL,
//!     record_offset BIGINT NOT NULL,
//!     ...
//!     PRIMARY KEY (transaction_id, owner_processor_name, record_offset)
//! );
//! ```
//!
//! Release runs inside one database transaction: the rows are locked with
//! `SELECT ... FOR UPDATE`, handed to the callback and deleted before commit.
//! A concurrent release of the same transaction blocks on the lock and then
//! finds nothing left to release.
//!
//! The callback writes snapshots through its own store. Those writes are
//! idempotent under replay-tolerant validation: if the callback or the commit
//! fails, the rows are kept and the next release skips every event that was
//! already applied.

use crate::storage;
use chrono::{DateTime, Utc};
use eventloom_core::buffer::{BufferedTransactionEvent, ReleaseFn, TransactionEventBuffer};
use eventloom_core::error::Result;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

const COLUMNS: &str = "transaction_id, owner_processor_name, record_offset, record_partition, topic, \
     received_at, produced_at, raw_key, raw_value, key_type_tag, value_type_tag";

const DECODE: &str = "Failed to decode buffered event";

/// Business transaction buffer backed by the `business_transaction_events` table.
#[derive(Clone, Debug)]
pub struct PostgresTransactionEventBuffer {
    pool: PgPool,
}

impl PostgresTransactionEventBuffer {
    /// Create a buffer using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_event(row: &PgRow) -> Result<BufferedTransactionEvent> {
        Ok(BufferedTransactionEvent {
            transaction_id: row.try_get("transaction_id").map_err(storage(DECODE))?,
            owner_processor_name: row
                .try_get("owner_processor_name")
                .map_err(storage(DECODE))?,
            offset: row.try_get("record_offset").map_err(storage(DECODE))?,
            partition: row.try_get("record_partition").map_err(storage(DECODE))?,
            topic: row.try_get("topic").map_err(storage(DECODE))?,
            received_at: row.try_get("received_at").map_err(storage(DECODE))?,
            produced_at: row.try_get("produced_at").map_err(storage(DECODE))?,
            raw_key: row.try_get("raw_key").map_err(storage(DECODE))?,
            raw_value: row.try_get("raw_value").map_err(storage(DECODE))?,
            key_type_tag: row.try_get("key_type_tag").map_err(storage(DECODE))?,
            value_type_tag: row.try_get("value_type_tag").map_err(storage(DECODE))?,
        })
    }
}

impl TransactionEventBuffer for PostgresTransactionEventBuffer {
    fn count_older_than(
        &self,
        before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM business_transaction_events WHERE received_at < $1",
            )
            .bind(before)
            .fetch_one(&self.pool)
            .await
            .map_err(storage("Failed to count stale events"))?;

            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    fn first_by_offset<'a>(
        &'a self,
        owner_processor_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BufferedTransactionEvent>>> + Send + 'a>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {COLUMNS} FROM business_transaction_events
                 WHERE owner_processor_name = $1
                 ORDER BY record_offset
                 LIMIT 1"
            );
            let row = sqlx::query(&query)
                .bind(owner_processor_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("Failed to load oldest buffered event"))?;

            row.as_ref().map(Self::row_to_event).transpose()
        })
    }

    fn first_on_partition<'a>(
        &'a self,
        owner_processor_name: &'a str,
        topic: &'a str,
        partition: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BufferedTransactionEvent>>> + Send + 'a>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {COLUMNS} FROM business_transaction_events
                 WHERE owner_processor_name = $1 AND topic = $2 AND record_partition = $3
                 ORDER BY record_offset
                 LIMIT 1"
            );
            let row = sqlx::query(&query)
                .bind(owner_processor_name)
                .bind(topic)
                .bind(partition)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("Failed to load head of partition"))?;

            row.as_ref().map(Self::row_to_event).transpose()
        })
    }

    fn all_for_transaction<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BufferedTransactionEvent>>> + Send + 'a>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {COLUMNS} FROM business_transaction_events
                 WHERE transaction_id = $1 AND owner_processor_name = $2
                 ORDER BY record_offset"
            );
            let rows = sqlx::query(&query)
                .bind(transaction_id)
                .bind(owner_processor_name)
                .fetch_all(&self.pool)
                .await
                .map_err(storage("Failed to load buffered transaction"))?;

            rows.iter().map(Self::row_to_event).collect()
        })
    }

    fn contains<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS (
                    SELECT 1 FROM business_transaction_events
                    WHERE transaction_id = $1 AND owner_processor_name = $2 AND record_offset = $3
                 )",
            )
            .bind(transaction_id)
            .bind(owner_processor_name)
            .bind(offset)
            .fetch_one(&self.pool)
            .await
            .map_err(storage("Failed to look up buffered event"))?;

            Ok(exists)
        })
    }

    fn remove_all_for_transaction<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM business_transaction_events
                 WHERE transaction_id = $1 AND owner_processor_name = $2",
            )
            .bind(transaction_id)
            .bind(owner_processor_name)
            .execute(&self.pool)
            .await
            .map_err(storage("Failed to remove buffered transaction"))?;

            Ok(result.rows_affected())
        })
    }

    fn save<'a>(
        &'a self,
        event: &'a BufferedTransactionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let query = format!(
                "INSERT INTO business_transaction_events ({COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (transaction_id, owner_processor_name, record_offset) DO NOTHING"
            );
            let result = sqlx::query(&query)
                .bind(event.transaction_id)
                .bind(&event.owner_processor_name)
                .bind(event.offset)
                .bind(event.partition)
                .bind(&event.topic)
                .bind(event.received_at)
                .bind(event.produced_at)
                .bind(&event.raw_key)
                .bind(event.raw_value.as_deref())
                .bind(&event.key_type_tag)
                .bind(event.value_type_tag.as_deref())
                .execute(&self.pool)
                .await
                .map_err(storage("Failed to buffer event"))?;

            if result.rows_affected() == 0 {
                tracing::debug!(
                    transaction_id = %event.transaction_id,
                    offset = event.offset,
                    "Event already buffered"
                );
            }
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM business_transaction_events")
                .execute(&self.pool)
                .await
                .map_err(storage("Failed to clear buffer"))?;
            Ok(())
        })
    }

    fn release<'a>(
        &'a self,
        transaction_id: Uuid,
        owner_processor_name: &'a str,
        apply: ReleaseFn<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(storage("Failed to start transaction"))?;

            let query = format!(
                "SELECT {COLUMNS} FROM business_transaction_events
                 WHERE transaction_id = $1 AND owner_processor_name = $2
                 ORDER BY record_offset
                 FOR UPDATE"
            );
            let rows = sqlx::query(&query)
                .bind(transaction_id)
                .bind(owner_processor_name)
                .fetch_all(&mut *tx)
                .await
                .map_err(storage("Failed to lock buffered transaction"))?;

            if rows.is_empty() {
                let _ = tx.rollback().await; // Nothing locked, nothing to undo
                return Ok(0);
            }

            let events = rows
                .iter()
                .map(Self::row_to_event)
                .collect::<Result<Vec<_>>>()?;
            let released = events.len();

            if let Err(e) = apply(events).await {
                let _ = tx.rollback().await;
                return Err(e);
            }

            sqlx::query(
                "DELETE FROM business_transaction_events
                 WHERE transaction_id = $1 AND owner_processor_name = $2",
            )
            .bind(transaction_id)
            .bind(owner_processor_name)
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to remove released transaction"))?;

            tx.commit()
                .await
                .map_err(storage("Failed to commit release"))?;

            Ok(released)
        })
    }
}
