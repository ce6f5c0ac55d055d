//! Online and restore pipelines.
//!
//! Both are transport-agnostic [`RecordHandler`]s: they decide whether a
//! record is done ([`Disposition::Commit`]) or must be delivered again
//! ([`Disposition::Withhold`]). The transport commits, seeks and sleeps.
//!
//! - [`OnlinePipeline`]: always running, applies records to live state
//!   through a [`BusinessTransactionAwareListener`] and advances the replay
//!   offset mark after each durable commit, never past a record that is
//!   still parked in the business transaction buffer.
//! - [`RestorePipeline`]: rebuilds state from the full log under its own
//!   consumer group, never ahead of the online pipeline.

use crate::listener::{BusinessTransactionAware, BusinessTransactionAwareListener};
use crate::metrics::PipelineMetrics;
use eventloom_core::consumer::{Disposition, RecordHandler};
use eventloom_core::error::{ConsistencyError, Result};
use eventloom_core::record::EventRecord;
use eventloom_core::replay::{ReplayCoordinator, RestoreDispatcher};
use std::future::Future;
use std::pin::Pin;

/// Live record processing.
pub struct OnlinePipeline<P> {
    listener: BusinessTransactionAwareListener<P>,
    coordinator: ReplayCoordinator,
}

impl<P: BusinessTransactionAware + 'static> OnlinePipeline<P> {
    /// Process records through `listener`; publish progress to `coordinator`.
    #[must_use]
    pub const fn new(listener: BusinessTransactionAwareListener<P>, coordinator: ReplayCoordinator) -> Self {
        Self { listener, coordinator }
    }

    /// Handle one record.
    ///
    /// A retryable error raised by the processor withholds the record so it
    /// is redelivered; every other error is returned.
    ///
    /// # Errors
    ///
    /// Non-retryable errors of the listener.
    pub async fn process(&self, record: &EventRecord) -> Result<Disposition> {
        let disposition = match self.listener.handle(record).await {
            Ok(()) => Disposition::Commit,
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    position = %record.position(),
                    error = %e,
                    "Online record withheld for redelivery"
                );
                Disposition::Withhold
            }
            Err(e) => {
                if e.is_fatal() {
                    tracing::error!(
                        position = %record.position(),
                        error = %e,
                        "Fatal consistency error, online consumer must stop"
                    );
                }
                return Err(e);
            }
        };
        PipelineMetrics::record_disposition("online", disposition.as_label());
        Ok(disposition)
    }

    /// Advance the replay offset mark after `record` was committed.
    ///
    /// Parked records of unfinished business transactions are committed but
    /// not applied yet, so the mark stops right before the oldest of them on
    /// the same partition. It catches up with the next commit after release.
    ///
    /// # Errors
    ///
    /// Buffer or offset mark storage failures.
    pub async fn committed(&self, record: &EventRecord) -> Result<()> {
        let mark = match self
            .listener
            .head_of_line(&record.topic, record.partition)
            .await?
        {
            Some(head) if head <= record.offset => {
                tracing::debug!(
                    position = %record.position(),
                    head,
                    "Offset mark held back by unreleased business transaction"
                );
                head - 1
            }
            _ => record.offset,
        };

        if mark < 0 {
            return Ok(());
        }
        self.coordinator
            .record_committed(&record.topic, record.partition, mark)
            .await
    }
}

impl<P: BusinessTransactionAware + 'static> RecordHandler for OnlinePipeline<P> {
    fn name(&self) -> &'static str {
        "online"
    }

    fn handle<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Disposition>> + Send + 'a>> {
        Box::pin(self.process(record))
    }

    fn on_committed<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.committed(record))
    }
}

/// Rebuilds state from the log, staying behind the online pipeline.
pub struct RestorePipeline {
    coordinator: ReplayCoordinator,
    dispatcher: RestoreDispatcher,
}

impl RestorePipeline {
    /// Gate records with `coordinator`; restore them through `dispatcher`.
    #[must_use]
    pub const fn new(coordinator: ReplayCoordinator, dispatcher: RestoreDispatcher) -> Self {
        Self {
            coordinator,
            dispatcher,
        }
    }

    /// Handle one record.
    ///
    /// A record the online pipeline has not processed yet is withheld
    /// without touching any state. Records of aggregate types without a
    /// registered strategy are committed untouched, like the online side
    /// ignores types it does not own.
    ///
    /// # Errors
    ///
    /// Strategy errors (fatal ordering violations) and storage failures.
    pub async fn process(&self, record: &EventRecord) -> Result<Disposition> {
        match self
            .coordinator
            .ensure_not_ahead(&record.topic, record.partition, record.offset)
            .await
        {
            Ok(()) => {}
            Err(ConsistencyError::AheadOfOnline { .. }) => {
                PipelineMetrics::record_disposition("restore", Disposition::Withhold.as_label());
                return Ok(Disposition::Withhold);
            }
            Err(e) => return Err(e),
        }

        match self.dispatcher.dispatch(record).await {
            Ok(()) => {}
            Err(ConsistencyError::UnknownAggregateType(aggregate_type)) => {
                tracing::debug!(
                    position = %record.position(),
                    %aggregate_type,
                    "No restore strategy for aggregate type, skipping"
                );
            }
            Err(e) => return Err(e),
        }
        PipelineMetrics::record_disposition("restore", Disposition::Commit.as_label());
        Ok(Disposition::Commit)
    }
}

impl RecordHandler for RestorePipeline {
    fn name(&self) -> &'static str {
        "restore"
    }

    fn handle<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Disposition>> + Send + 'a>> {
        Box::pin(self.process(record))
    }
}
