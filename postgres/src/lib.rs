//! `PostgreSQL` storage for Eventloom.
//!
//! This crate provides the durable side of the consumer protocol:
//!
//! - [`PostgresTransactionEventBuffer`]: parked business transaction records,
//!   released inside a database transaction
//! - [`PostgresOffsetMarkStore`]: replay offset marks of the online pipeline
//! - [`PostgresSnapshotStore`]: local snapshots of one aggregate type
//!
//! All three share one pool and one schema, created by [`migrate`].
//!
//! # Example
//!
//! ```no_run
//! use eventloom_postgres::{PostgresOffsetMarkStore, PostgresTransactionEventBuffer, connect, migrate};
//!
//! # async fn example() -> eventloom_core::Result<()> {
//! let pool = connect("postgres://localhost/eventloom", 10).await?;
//! migrate(&pool).await?;
//!
//! let buffer = PostgresTransactionEventBuffer::new(pool.clone());
//! let marks = PostgresOffsetMarkStore::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eventloom_core::error::{ConsistencyError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

pub mod buffer;
pub mod offset_marks;
pub mod snapshot_store;

pub use buffer::PostgresTransactionEventBuffer;
pub use offset_marks::PostgresOffsetMarkStore;
pub use snapshot_store::PostgresSnapshotStore;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`ConsistencyError::Storage`] if the connection fails.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| ConsistencyError::Storage(format!("Failed to connect: {e}")))
}

/// Create the buffer, offset mark and snapshot tables if they don't exist.
///
/// # Errors
///
/// Returns [`ConsistencyError::Storage`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| ConsistencyError::Storage(format!("Migration failed: {e}")))?;
    tracing::info!("Eventloom schema migrated");
    Ok(())
}

/// Map a sqlx error into [`ConsistencyError::Storage`] with context.
pub(crate) fn storage(context: &'static str) -> impl FnOnce(sqlx::Error) -> ConsistencyError {
    move |e| ConsistencyError::Storage(format!("{context}: {e}"))
}
