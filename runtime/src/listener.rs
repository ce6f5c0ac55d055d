//! Consumer-side release of business transactions.
//!
//! The events of a business transaction reach a consumer as independent
//! records, framed by a `TransactionStarted` and a `TransactionFinished`
//! marker. [`BusinessTransactionAwareListener`] parks every record carrying a
//! transaction id in a [`TransactionEventBuffer`] and, when the finished marker
//! arrives, hands the whole group to the processor in offset order:
//!
//! ```text
//! started ─► buffer, on_transaction_started
//! event   ─► buffer, on_transactional_event        (repeated)
//! event   ─► buffer, on_transactional_event
//! finished ─► release: on_transaction_finished(started, [events], finished), delete rows
//! ```
//!
//! Redelivered markers are idempotent: a started marker already buffered is
//! ignored, a finished marker with nothing left to release is ignored.
//! Redelivered events are dispatched again but buffered only once.

use crate::metrics::TransactionMetrics;
use eventloom_core::aggregate::INITIAL_SNAPSHOT_VERSION;
use eventloom_core::buffer::{BufferedTransactionEvent, TransactionEventBuffer};
use eventloom_core::environment::Clock;
use eventloom_core::error::{ConsistencyError, Result};
use eventloom_core::mapper::AggregateEvent;
use eventloom_core::record::{EventRecord, KeyKind};
use eventloom_core::snapshot::VersionedSnapshot;
use eventloom_core::snapshot_store::SnapshotStore;
use eventloom_core::validation::{ValidationMode, VersionCheck};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Callbacks of a business-transaction-aware consumer.
pub trait BusinessTransactionAware: Send + Sync {
    /// A `TransactionStarted` marker was buffered.
    ///
    /// # Errors
    ///
    /// Any error withholds the record.
    fn on_transaction_started(&self, _started: &EventRecord) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// An event of an open transaction was buffered.
    ///
    /// # Errors
    ///
    /// Any error withholds the record.
    fn on_transactional_event(&self, _record: &EventRecord) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// The transaction is complete. `events` are in offset order and exclude
    /// the markers. `started` is `None` if the started marker was never seen
    /// by this consumer (e.g. it joined mid-transaction).
    ///
    /// # Errors
    ///
    /// Any error keeps the transaction buffered.
    fn on_transaction_finished(
        &self,
        started: Option<&EventRecord>,
        events: &[EventRecord],
        finished: &EventRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// A record without a transaction id.
    ///
    /// # Errors
    ///
    /// Any error withholds the record.
    fn on_non_transactional_event(&self, record: &EventRecord) -> impl Future<Output = Result<()>> + Send;
}

/// Buffers business transaction records and releases them on completion.
pub struct BusinessTransactionAwareListener<P> {
    processor: Arc<P>,
    buffer: Arc<dyn TransactionEventBuffer>,
    processor_name: String,
    clock: Arc<dyn Clock>,
}

impl<P> Clone for BusinessTransactionAwareListener<P> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
            buffer: Arc::clone(&self.buffer),
            processor_name: self.processor_name.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<P: BusinessTransactionAware + 'static> BusinessTransactionAwareListener<P> {
    /// Listen on behalf of `processor_name`, which owns its buffer rows.
    #[must_use]
    pub fn new(
        processor: Arc<P>,
        buffer: Arc<dyn TransactionEventBuffer>,
        processor_name: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            processor,
            buffer,
            processor_name: processor_name.into(),
            clock,
        }
    }

    /// Name owning this listener's buffer rows.
    #[must_use]
    pub fn processor_name(&self) -> &str {
        &self.processor_name
    }

    /// The wrapped processor.
    #[must_use]
    pub const fn processor(&self) -> &Arc<P> {
        &self.processor
    }

    /// Offset of the oldest record still parked on one partition.
    ///
    /// # Errors
    ///
    /// Buffer failures.
    pub async fn head_of_line(&self, topic: &str, partition: i32) -> Result<Option<i64>> {
        let head = self
            .buffer
            .first_on_partition(&self.processor_name, topic, partition)
            .await?;
        Ok(head.map(|row| row.offset))
    }

    /// Handle one record.
    ///
    /// # Errors
    ///
    /// Buffer failures and processor errors.
    pub async fn handle(&self, record: &EventRecord) -> Result<()> {
        let Some(transaction_id) = record.transaction_id() else {
            return self.processor.on_non_transactional_event(record).await;
        };

        match &record.key.kind {
            KeyKind::TransactionStarted => {
                if self
                    .buffer
                    .contains(transaction_id, &self.processor_name, record.offset)
                    .await?
                {
                    tracing::debug!(
                        %transaction_id,
                        position = %record.position(),
                        "Duplicate transaction started marker, ignoring"
                    );
                    return Ok(());
                }
                self.park(record, transaction_id).await?;
                self.processor.on_transaction_started(record).await
            }
            KeyKind::Aggregate(_) => {
                self.park(record, transaction_id).await?;
                self.processor.on_transactional_event(record).await
            }
            KeyKind::TransactionFinished => self.release(record, transaction_id).await,
        }
    }

    async fn park(&self, record: &EventRecord, transaction_id: Uuid) -> Result<()> {
        let buffered = BufferedTransactionEvent::from_record(
            record,
            transaction_id,
            self.processor_name.clone(),
            self.clock.now(),
        )?;
        self.buffer.save(&buffered).await?;
        tracing::trace!(%transaction_id, position = %record.position(), "Record buffered");
        Ok(())
    }

    async fn release(&self, finished: &EventRecord, transaction_id: Uuid) -> Result<()> {
        let started_at = Instant::now();
        let processor = Arc::clone(&self.processor);

        let released = self
            .buffer
            .release(
                transaction_id,
                &self.processor_name,
                Box::new(move |buffered| {
                    Box::pin(async move {
                        let mut started = None;
                        let mut events = Vec::with_capacity(buffered.len());
                        for row in &buffered {
                            let record = row.to_record()?;
                            match record.key.kind {
                                KeyKind::TransactionStarted => started = Some(record),
                                KeyKind::Aggregate(_) | KeyKind::TransactionFinished => events.push(record),
                            }
                        }
                        processor
                            .on_transaction_finished(started.as_ref(), &events, finished)
                            .await
                    })
                }),
            )
            .await?;

        if released == 0 {
            tracing::debug!(
                %transaction_id,
                position = %finished.position(),
                "Nothing buffered for finished marker, treating as duplicate"
            );
            return Ok(());
        }

        TransactionMetrics::record_release(&self.processor_name, started_at.elapsed());
        tracing::info!(
            %transaction_id,
            processor = %self.processor_name,
            released,
            "Business transaction released"
        );
        Ok(())
    }
}

/// Applies aggregate records to a [`SnapshotStore`].
///
/// Non-transactional records are applied in the pipeline's mode. A consumer
/// has no command to reload, so a stale version or a repeated tombstone seen
/// online is a redelivery of something already applied: it is logged and
/// skipped instead of failing the record.
///
/// Released business transactions are applied in [`ValidationMode::Restore`]:
/// after a crash between apply and delete they are released again, and
/// already applied events must be skipped rather than rejected. The whole
/// transaction is decoded and version-checked before the first write, so a
/// gap or a corrupt payload anywhere in it leaves the store untouched.
///
/// Records of other aggregate types are ignored.
pub struct SnapshotStoreProcessor<St> {
    store: Arc<St>,
    mode: ValidationMode,
}

impl<St: SnapshotStore> SnapshotStoreProcessor<St> {
    /// Apply non-transactional records in `mode`.
    #[must_use]
    pub const fn new(store: Arc<St>, mode: ValidationMode) -> Self {
        Self { store, mode }
    }

    /// The wrapped store.
    #[must_use]
    pub const fn store(&self) -> &Arc<St> {
        &self.store
    }

    fn owns(&self, record: &EventRecord) -> bool {
        record
            .key
            .aggregate_identifier()
            .is_some_and(|identifier| *identifier.aggregate_type() == self.store.aggregate_type())
    }

    /// Records of a released transaction that still have to be applied, in
    /// order. Versions are tracked per aggregate across the batch.
    async fn plan<'r>(&self, events: &'r [EventRecord]) -> Result<Vec<&'r EventRecord>> {
        let mut versions: HashMap<Uuid, i64> = HashMap::new();
        let mut pending = Vec::with_capacity(events.len());

        for record in events.iter().filter(|r| self.owns(r)) {
            let Some(identifier) = record.key.aggregate_identifier() else {
                continue;
            };
            let id = identifier.identifier();
            let current = match versions.get(&id) {
                Some(version) => *version,
                None => self
                    .store
                    .find(id)
                    .await?
                    .map_or(INITIAL_SNAPSHOT_VERSION, |snapshot| snapshot.header().version),
            };

            if record.is_tombstone() && current == INITIAL_SNAPSHOT_VERSION {
                versions.insert(id, current);
                continue;
            }

            let check = VersionCheck::evaluate(current, identifier.version(), ValidationMode::Restore);
            match check {
                VersionCheck::Apply => {
                    if let Some(value) = &record.value {
                        AggregateEvent::<St::Snapshot>::from_serialized(value)?;
                    }
                    let next = if record.is_tombstone() {
                        INITIAL_SNAPSHOT_VERSION
                    } else {
                        current + 1
                    };
                    versions.insert(id, next);
                    pending.push(record);
                }
                VersionCheck::Skip => {
                    versions.insert(id, current);
                }
                VersionCheck::Conflict | VersionCheck::FatalGap => {
                    tracing::error!(
                        aggregate = %identifier,
                        snapshot_version = current,
                        position = %record.position(),
                        "Released business transaction has a version gap, nothing applied"
                    );
                    check.into_result(identifier, current)?;
                }
            }
        }
        Ok(pending)
    }
}

impl<St: SnapshotStore> BusinessTransactionAware for SnapshotStoreProcessor<St> {
    async fn on_transaction_finished(
        &self,
        _started: Option<&EventRecord>,
        events: &[EventRecord],
        _finished: &EventRecord,
    ) -> Result<()> {
        for record in self.plan(events).await? {
            self.store.handle_record(record, ValidationMode::Restore).await?;
        }
        Ok(())
    }

    async fn on_non_transactional_event(&self, record: &EventRecord) -> Result<()> {
        if !self.owns(record) {
            return Ok(());
        }
        match self.store.handle_record(record, self.mode).await {
            Ok(_) => Ok(()),
            Err(
                e @ (ConsistencyError::OptimisticConflict { .. }
                | ConsistencyError::UnexpectedTombstone { .. }),
            ) => {
                tracing::warn!(
                    position = %record.position(),
                    error = %e,
                    "Record already applied, skipping redelivery"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
