//! `PostgreSQL` [`SnapshotStore`].
//!
//! Snapshots of every aggregate type share the `snapshots` table, keyed by
//! `(aggregate_type, identifier)`. The snapshot itself is stored as bincode
//! next to its version, so version checks never decode the payload.

use crate::storage;
use eventloom_core::aggregate::{AggregateIdentifier, AggregateType};
use eventloom_core::error::{ConsistencyError, Result};
use eventloom_core::mapper::AggregateEvent;
use eventloom_core::snapshot::VersionedSnapshot;
use eventloom_core::snapshot_store::SnapshotStore;
use serde::{Serialize, de::DeserializeOwned};
use sqlx::postgres::PgPool;
use std::marker::PhantomData;
use uuid::Uuid;

/// Snapshots of one aggregate type.
///
/// # Example
///
/// ```ignore
/// let tasks = PostgresSnapshotStore::<Task>::new(pool, "TASK");
/// let dispatcher = RestoreDispatcher::builder()
///     .register("TASK", Arc::new(SnapshotRestoreStrategy::new(Arc::new(tasks))))?
///     .build();
/// ```
#[derive(Debug)]
pub struct PostgresSnapshotStore<S> {
    pool: PgPool,
    aggregate_type: AggregateType,
    _snapshot: PhantomData<fn() -> S>,
}

impl<S> Clone for PostgresSnapshotStore<S> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            aggregate_type: self.aggregate_type.clone(),
            _snapshot: PhantomData,
        }
    }
}

impl<S> PostgresSnapshotStore<S> {
    /// Create a store for `aggregate_type` using an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool, aggregate_type: impl Into<AggregateType>) -> Self {
        Self {
            pool,
            aggregate_type: aggregate_type.into(),
            _snapshot: PhantomData,
        }
    }

    /// Version of a stored snapshot, without decoding it.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Storage`] if the query fails.
    pub async fn version_of(&self, identifier: Uuid) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT version FROM snapshots WHERE aggregate_type = $1 AND identifier = $2",
        )
        .bind(self.aggregate_type.as_str())
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("Failed to load snapshot version"))?;

        Ok(row.map(|(version,)| version))
    }
}

impl<S> SnapshotStore for PostgresSnapshotStore<S>
where
    S: VersionedSnapshot + Serialize + DeserializeOwned,
{
    type Snapshot = S;

    fn aggregate_type(&self) -> AggregateType {
        self.aggregate_type.clone()
    }

    async fn find(&self, identifier: Uuid) -> Result<Option<S>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT data FROM snapshots WHERE aggregate_type = $1 AND identifier = $2",
        )
        .bind(self.aggregate_type.as_str())
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("Failed to load snapshot"))?;

        row.map(|(data,)| {
            bincode::deserialize(&data).map_err(|e| {
                ConsistencyError::Serialization(format!(
                    "Failed to decode {} {identifier}: {e}",
                    self.aggregate_type
                ))
            })
        })
        .transpose()
    }

    async fn apply_event(&self, event: AggregateEvent<S>) -> Result<i64> {
        let header = event.aggregate.header();
        let data = bincode::serialize(&event.aggregate)
            .map_err(|e| ConsistencyError::Serialization(e.to_string()))?;

        let (version,): (i64,) = sqlx::query_as(
            "INSERT INTO snapshots (aggregate_type, identifier, root_context_identifier, version, data, updated_at)
             VALUES ($1, $2, $3, $4, $5, now())
             ON CONFLICT (aggregate_type, identifier) DO UPDATE
             SET version = EXCLUDED.version, data = EXCLUDED.data, updated_at = now()
             RETURNING version",
        )
        .bind(self.aggregate_type.as_str())
        .bind(header.identifier)
        .bind(event.root_context_identifier)
        .bind(header.version)
        .bind(data)
        .fetch_one(&self.pool)
        .await
        .map_err(storage("Failed to store snapshot"))?;

        tracing::debug!(aggregate = %event.aggregate_identifier, "Snapshot stored");
        Ok(version)
    }

    async fn apply_tombstone(&self, identifier: &AggregateIdentifier) -> Result<i64> {
        let version = i64::try_from(identifier.version())
            .map_err(|e| ConsistencyError::Storage(format!("Version out of range: {e}")))?;

        sqlx::query("DELETE FROM snapshots WHERE aggregate_type = $1 AND identifier = $2")
            .bind(self.aggregate_type.as_str())
            .bind(identifier.identifier())
            .execute(&self.pool)
            .await
            .map_err(storage("Failed to delete snapshot"))?;

        tracing::debug!(aggregate = %identifier, "Snapshot deleted");
        Ok(version)
    }
}
