//! Coordination between the online pipeline and the restore pipeline.
//!
//! The restore pipeline rebuilds a service's database from the full log
//! history under its own consumer group. It must never process a record the
//! online pipeline has not processed yet, otherwise the rebuilt state could
//! observe effects the live state has not.
//!
//! ```text
//! online consumer ── commit offset o ──► record_committed ──► ReplayOffsetMark(t, p) = o
//!                                                                   │
//! restore consumer ── record at o' ──► ensure_not_ahead ◄───────────┘
//!                                       mark ≥ o'  → dispatch by aggregate type
//!                                       mark < o'  → AheadOfOnline (withhold, redeliver)
//! ```

use crate::aggregate::AggregateType;
use crate::error::{ConsistencyError, Result};
use crate::record::{EventRecord, KeyKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Last offset the online pipeline processed and committed on one partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplayOffsetMark {
    /// Topic.
    pub topic: String,
    /// Partition.
    pub partition: i32,
    /// Offset of the last processed record.
    pub offset: i64,
}

/// Storage of [`ReplayOffsetMark`]s, one row per (topic, partition).
///
/// Written by the online pipeline only; the restore pipeline reads.
pub trait OffsetMarkStore: Send + Sync {
    /// Current mark of a partition, if the online pipeline committed anything.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn get<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ReplayOffsetMark>>> + Send + 'a>>;

    /// Move the mark forward. A mark never moves backwards: advancing to an
    /// offset at or below the current mark leaves it unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Storage` on backend failure.
    fn advance<'a>(
        &'a self,
        mark: &'a ReplayOffsetMark,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Keeps the restore pipeline causally behind the online pipeline.
#[derive(Clone)]
pub struct ReplayCoordinator {
    marks: Arc<dyn OffsetMarkStore>,
}

impl ReplayCoordinator {
    /// Coordinate through `marks`.
    #[must_use]
    pub fn new(marks: Arc<dyn OffsetMarkStore>) -> Self {
        Self { marks }
    }

    /// Online role: record that `offset` has been durably committed.
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn record_committed(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mark = ReplayOffsetMark {
            topic: topic.to_string(),
            partition,
            offset,
        };
        self.marks.advance(&mark).await?;
        tracing::trace!(topic, partition, offset, "Replay offset mark advanced");
        Ok(())
    }

    /// Restore role: fail unless the online pipeline already processed
    /// `offset`. A partition without a mark counts as not processed.
    ///
    /// # Errors
    ///
    /// [`ConsistencyError::AheadOfOnline`] if the record must be withheld,
    /// `ConsistencyError::Storage` on backend failure.
    pub async fn ensure_not_ahead(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mark = self.marks.get(topic, partition).await?.map(|m| m.offset);
        match mark {
            Some(mark) if mark >= offset => Ok(()),
            _ => {
                metrics::counter!("eventloom_restore_ahead_of_online_total").increment(1);
                tracing::debug!(
                    topic,
                    partition,
                    offset,
                    mark = ?mark,
                    "Restore pipeline ahead of online pipeline, withholding record"
                );
                Err(ConsistencyError::AheadOfOnline {
                    topic: topic.to_string(),
                    partition,
                    offset,
                    mark,
                })
            }
        }
    }
}

/// Writes the final state of one aggregate type into the restore store.
pub trait RestoreStrategy: Send + Sync {
    /// Apply one aggregate record during restore.
    ///
    /// # Errors
    ///
    /// Any error stops processing of the record; fatal errors stop the consumer.
    fn restore<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Routes restore records to the strategy registered for their aggregate type.
///
/// # Example
///
/// ```
/// use eventloom_core::error::Result;
/// use eventloom_core::record::EventRecord;
/// use eventloom_core::replay::{RestoreDispatcher, RestoreStrategy};
/// use std::future::Future;
/// use std::pin::Pin;
/// use std::sync::Arc;
///
/// struct NoOp;
///
/// impl RestoreStrategy for NoOp {
///     fn restore<'a>(&'a self, _record: &'a EventRecord)
///         -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
///         Box::pin(async { Ok(()) })
///     }
/// }
///
/// let dispatcher = RestoreDispatcher::builder()
///     .register("TASK", Arc::new(NoOp)).unwrap()
///     .build();
/// assert!(dispatcher.handles(&"TASK".into()));
///
/// let duplicate = RestoreDispatcher::builder()
///     .register("TASK", Arc::new(NoOp)).unwrap()
///     .register("TASK", Arc::new(NoOp));
/// assert!(duplicate.is_err());
/// ```
#[derive(Clone)]
pub struct RestoreDispatcher {
    strategies: HashMap<AggregateType, Arc<dyn RestoreStrategy>>,
}

impl RestoreDispatcher {
    /// Start registering strategies.
    #[must_use]
    pub fn builder() -> RestoreDispatcherBuilder {
        RestoreDispatcherBuilder {
            strategies: HashMap::new(),
        }
    }

    /// Whether a strategy is registered for `aggregate_type`.
    #[must_use]
    pub fn handles(&self, aggregate_type: &AggregateType) -> bool {
        self.strategies.contains_key(aggregate_type)
    }

    /// Restore one record. Marker records are skipped.
    ///
    /// # Errors
    ///
    /// [`ConsistencyError::UnknownAggregateType`] if no strategy is registered
    /// for the record's aggregate type, otherwise the strategy's error.
    pub async fn dispatch(&self, record: &EventRecord) -> Result<()> {
        let aggregate_type = match &record.key.kind {
            KeyKind::Aggregate(identifier) => identifier.aggregate_type(),
            KeyKind::TransactionStarted | KeyKind::TransactionFinished => {
                tracing::trace!(position = %record.position(), "Skipping marker record during restore");
                return Ok(());
            }
        };

        let strategy = self
            .strategies
            .get(aggregate_type)
            .ok_or_else(|| ConsistencyError::UnknownAggregateType(aggregate_type.to_string()))?;
        strategy.restore(record).await
    }
}

/// Builder for [`RestoreDispatcher`].
pub struct RestoreDispatcherBuilder {
    strategies: HashMap<AggregateType, Arc<dyn RestoreStrategy>>,
}

impl RestoreDispatcherBuilder {
    /// Register the strategy for `aggregate_type`.
    ///
    /// # Errors
    ///
    /// [`ConsistencyError::DuplicateStrategy`] if one is already registered.
    pub fn register(
        mut self,
        aggregate_type: impl Into<AggregateType>,
        strategy: Arc<dyn RestoreStrategy>,
    ) -> Result<Self> {
        let aggregate_type = aggregate_type.into();
        if self.strategies.contains_key(&aggregate_type) {
            return Err(ConsistencyError::DuplicateStrategy(aggregate_type.to_string()));
        }
        self.strategies.insert(aggregate_type, strategy);
        Ok(self)
    }

    /// Finish registration.
    #[must_use]
    pub fn build(self) -> RestoreDispatcher {
        RestoreDispatcher {
            strategies: self.strategies,
        }
    }
}
