//! `PostgreSQL` [`OffsetMarkStore`].

use crate::storage;
use eventloom_core::error::Result;
use eventloom_core::replay::{OffsetMarkStore, ReplayOffsetMark};
use sqlx::postgres::PgPool;
use std::future::Future;
use std::pin::Pin;

/// Replay offset marks in the `replay_offset_marks` table.
///
/// Advancing is a single upsert with `GREATEST`, so a late or duplicated
/// commit from the online pipeline can never move a mark backwards.
#[derive(Clone, Debug)]
pub struct PostgresOffsetMarkStore {
    pool: PgPool,
}

impl PostgresOffsetMarkStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl OffsetMarkStore for PostgresOffsetMarkStore {
    fn get<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ReplayOffsetMark>>> + Send + 'a>> {
        Box::pin(async move {
            let offset: Option<(i64,)> = sqlx::query_as(
                "SELECT record_offset FROM replay_offset_marks
                 WHERE topic = $1 AND record_partition = $2",
            )
            .bind(topic)
            .bind(partition)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("Failed to load replay offset mark"))?;

            Ok(offset.map(|(offset,)| ReplayOffsetMark {
                topic: topic.to_string(),
                partition,
                offset,
            }))
        })
    }

    fn advance<'a>(
        &'a self,
        mark: &'a ReplayOffsetMark,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO replay_offset_marks (topic, record_partition, record_offset, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (topic, record_partition) DO UPDATE
                 SET record_offset = GREATEST(replay_offset_marks.record_offset, EXCLUDED.record_offset),
                     updated_at = now()",
            )
            .bind(&mark.topic)
            .bind(mark.partition)
            .bind(mark.offset)
            .execute(&self.pool)
            .await
            .map_err(storage("Failed to advance replay offset mark"))?;
            Ok(())
        })
    }
}
