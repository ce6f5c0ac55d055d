//! Integration tests for the business-transaction-aware listener
//!
//! Records are produced through `ProducerBusinessTransaction` and a
//! recording publisher, then fed to the listener in log order.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use eventloom_core::business_transaction::{BusinessTransactionScope, ProducerBusinessTransaction};
use eventloom_core::command::CommandHandler;
use eventloom_core::error::{ConsistencyError, Result};
use eventloom_core::event::SerializedEvent;
use eventloom_core::record::{EventRecord, MessageKey};
use eventloom_core::validation::ValidationMode;
use eventloom_runtime::{BusinessTransactionAware, BusinessTransactionAwareListener, SnapshotStoreProcessor};
use eventloom_testing::fixtures::{ACTOR, RecordBuilder, TASK, TASK_TOPIC, Task, marker, task_history};
use eventloom_testing::{InMemorySnapshotStore, InMemoryTransactionEventBuffer, RecordingEventPublisher, test_clock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

// ============================================================================
// Test Fixtures
// ============================================================================

const PROCESSOR: &str = "task-projection";

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Started(i64),
    Event(i64),
    Finished {
        started: Option<i64>,
        events: Vec<i64>,
        finished: i64,
    },
    NonTransactional(i64),
}

#[derive(Default)]
struct RecordingProcessor {
    calls: Mutex<Vec<Call>>,
    fail_finish: AtomicBool,
}

impl RecordingProcessor {
    async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }
}

impl BusinessTransactionAware for RecordingProcessor {
    async fn on_transaction_started(&self, started: &EventRecord) -> Result<()> {
        self.calls.lock().await.push(Call::Started(started.offset));
        Ok(())
    }

    async fn on_transactional_event(&self, record: &EventRecord) -> Result<()> {
        self.calls.lock().await.push(Call::Event(record.offset));
        Ok(())
    }

    async fn on_transaction_finished(
        &self,
        started: Option<&EventRecord>,
        events: &[EventRecord],
        finished: &EventRecord,
    ) -> Result<()> {
        if self.fail_finish.load(Ordering::SeqCst) {
            return Err(ConsistencyError::Storage("projection unavailable".into()));
        }
        self.calls.lock().await.push(Call::Finished {
            started: started.map(|r| r.offset),
            events: events.iter().map(|r| r.offset).collect(),
            finished: finished.offset,
        });
        Ok(())
    }

    async fn on_non_transactional_event(&self, record: &EventRecord) -> Result<()> {
        self.calls.lock().await.push(Call::NonTransactional(record.offset));
        Ok(())
    }
}

fn listener<P: BusinessTransactionAware + 'static>(
    processor: Arc<P>,
    buffer: &InMemoryTransactionEventBuffer,
) -> BusinessTransactionAwareListener<P> {
    BusinessTransactionAwareListener::new(
        processor,
        Arc::new(buffer.clone()),
        PROCESSOR,
        Arc::new(test_clock()),
    )
}

/// started(0), event(1), event(2), finished(3) of one business transaction.
async fn transaction_records(project: Uuid) -> Vec<EventRecord> {
    let publisher = RecordingEventPublisher::new();
    let scope = BusinessTransactionScope::new();
    let clock = test_clock();

    ProducerBusinessTransaction::new(Arc::new(publisher.clone()), TASK_TOPIC)
        .run(&scope, project, &marker("ImportStarted"), &marker("ImportFinished"), || async {
            for title in ["Design", "Build"] {
                CommandHandler::new(Task::new(project, title))?
                    .emit_event("TaskCreated.v1")
                    .to(&publisher, TASK_TOPIC, ACTOR, &clock, Some(&scope))
                    .await?;
            }
            Ok(())
        })
        .await
        .unwrap();

    publisher.records()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn transaction_is_released_on_finished_marker() {
    let processor = Arc::new(RecordingProcessor::default());
    let buffer = InMemoryTransactionEventBuffer::new();
    let listener = listener(processor.clone(), &buffer);

    let records = transaction_records(Uuid::new_v4()).await;
    for record in &records[..3] {
        listener.handle(record).await.unwrap();
    }
    assert_eq!(buffer.len(), 3, "started marker and events are parked");

    listener.handle(&records[3]).await.unwrap();

    assert_eq!(
        processor.calls().await,
        vec![
            Call::Started(0),
            Call::Event(1),
            Call::Event(2),
            Call::Finished {
                started: Some(0),
                events: vec![1, 2],
                finished: 3,
            },
        ]
    );
    assert!(buffer.is_empty());
}

#[tokio::test]
async fn redelivered_markers_are_idempotent() {
    let processor = Arc::new(RecordingProcessor::default());
    let buffer = InMemoryTransactionEventBuffer::new();
    let listener = listener(processor.clone(), &buffer);
    let records = transaction_records(Uuid::new_v4()).await;

    listener.handle(&records[0]).await.unwrap();
    listener.handle(&records[0]).await.unwrap();
    for record in &records[1..] {
        listener.handle(record).await.unwrap();
    }
    listener.handle(&records[3]).await.unwrap();

    let calls = processor.calls().await;
    assert_eq!(calls.iter().filter(|c| matches!(c, Call::Started(_))).count(), 1);
    assert_eq!(calls.iter().filter(|c| matches!(c, Call::Finished { .. })).count(), 1);
}

#[tokio::test]
async fn records_without_transaction_bypass_the_buffer() {
    let processor = Arc::new(RecordingProcessor::default());
    let buffer = InMemoryTransactionEventBuffer::new();
    let listener = listener(processor.clone(), &buffer);

    let task = Task::new(Uuid::new_v4(), "Solo");
    let event = task_history(&task, 1).unwrap().remove(0);
    let record = RecordBuilder::for_event(&event, None).unwrap().offset(8).build();

    listener.handle(&record).await.unwrap();

    assert_eq!(processor.calls().await, vec![Call::NonTransactional(8)]);
    assert!(buffer.is_empty());
}

#[tokio::test]
async fn finished_marker_without_started_releases_events() {
    let processor = Arc::new(RecordingProcessor::default());
    let buffer = InMemoryTransactionEventBuffer::new();
    let listener = listener(processor.clone(), &buffer);
    let records = transaction_records(Uuid::new_v4()).await;

    for record in &records[1..] {
        listener.handle(record).await.unwrap();
    }

    let calls = processor.calls().await;
    assert_eq!(
        calls.last().unwrap(),
        &Call::Finished {
            started: None,
            events: vec![1, 2],
            finished: 3,
        }
    );
}

#[tokio::test]
async fn failed_release_keeps_transaction_buffered() {
    let processor = Arc::new(RecordingProcessor::default());
    let buffer = InMemoryTransactionEventBuffer::new();
    let listener = listener(processor.clone(), &buffer);
    let records = transaction_records(Uuid::new_v4()).await;

    processor.fail_finish.store(true, Ordering::SeqCst);
    for record in &records[..3] {
        listener.handle(record).await.unwrap();
    }
    assert!(listener.handle(&records[3]).await.is_err());
    assert_eq!(buffer.len(), 3);

    processor.fail_finish.store(false, Ordering::SeqCst);
    listener.handle(&records[3]).await.unwrap();

    assert!(buffer.is_empty());
    assert!(matches!(
        processor.calls().await.last(),
        Some(Call::Finished { .. })
    ));
}

#[tokio::test]
async fn stray_finished_marker_is_ignored() {
    let processor = Arc::new(RecordingProcessor::default());
    let buffer = InMemoryTransactionEventBuffer::new();
    let listener = listener(processor.clone(), &buffer);

    let finished = RecordBuilder::new(MessageKey::transaction_finished(Uuid::new_v4(), Uuid::new_v4()))
        .value(marker("ImportFinished"))
        .build();
    listener.handle(&finished).await.unwrap();

    assert!(processor.calls().await.is_empty());
}

#[tokio::test]
async fn snapshot_processor_applies_released_transaction() {
    let store = Arc::new(InMemorySnapshotStore::<Task>::new(TASK));
    let processor = Arc::new(SnapshotStoreProcessor::new(store.clone(), ValidationMode::Online));
    let buffer = InMemoryTransactionEventBuffer::new();
    let listener = listener(processor, &buffer);
    let records = transaction_records(Uuid::new_v4()).await;

    for record in &records[..3] {
        listener.handle(record).await.unwrap();
    }
    assert!(store.is_empty(), "nothing is applied before the transaction finishes");

    listener.handle(&records[3]).await.unwrap();
    assert_eq!(store.len(), 2);

    // Redelivered after release: the same events are released and skipped.
    for record in &records[1..3] {
        listener.handle(record).await.unwrap();
    }
    listener.handle(&records[3]).await.unwrap();
    assert_eq!(store.applied().len(), 2);
}

#[tokio::test]
async fn snapshot_processor_ignores_other_aggregate_types() {
    let store = Arc::new(InMemorySnapshotStore::<Task>::new("PROJECT"));
    let processor = Arc::new(SnapshotStoreProcessor::new(store.clone(), ValidationMode::Online));
    let buffer = InMemoryTransactionEventBuffer::new();
    let listener = listener(processor, &buffer);

    let task = Task::new(Uuid::new_v4(), "Elsewhere");
    let event = task_history(&task, 1).unwrap().remove(0);
    listener
        .handle(&RecordBuilder::for_event(&event, None).unwrap().build())
        .await
        .unwrap();

    assert!(store.is_empty());
    assert_eq!(listener.processor_name(), PROCESSOR);
}

#[tokio::test]
async fn snapshot_processor_applies_nothing_when_transaction_has_gap() {
    let store = Arc::new(InMemorySnapshotStore::<Task>::new(TASK));
    let processor = Arc::new(SnapshotStoreProcessor::new(store.clone(), ValidationMode::Online));
    let buffer = InMemoryTransactionEventBuffer::new();
    let listener = listener(processor, &buffer);

    let task = Task::new(Uuid::new_v4(), "Gapped");
    let history = task_history(&task, 3).unwrap();
    let tx = Uuid::new_v4();
    for (offset, event) in [(1, &history[0]), (2, &history[2])] {
        let record = RecordBuilder::for_event(event, Some(tx)).unwrap().offset(offset).build();
        listener.handle(&record).await.unwrap();
    }
    let finished = RecordBuilder::new(MessageKey::transaction_finished(task.project, tx))
        .value(marker("ImportFinished"))
        .offset(3)
        .build();

    let result = listener.handle(&finished).await;

    assert!(matches!(
        result,
        Err(ConsistencyError::FatalOrderingViolation {
            snapshot_version: 0,
            event_version: 2,
            ..
        })
    ));
    assert!(store.applied().is_empty(), "the first event must not be applied alone");
    assert_eq!(buffer.len(), 2);
}

#[tokio::test]
async fn snapshot_processor_rejects_corrupt_payload_before_applying() {
    let store = Arc::new(InMemorySnapshotStore::<Task>::new(TASK));
    let processor = Arc::new(SnapshotStoreProcessor::new(store.clone(), ValidationMode::Online));
    let buffer = InMemoryTransactionEventBuffer::new();
    let listener = listener(processor, &buffer);

    let first = Task::new(Uuid::new_v4(), "Fine");
    let second = Task::new(first.project, "Broken");
    let tx = Uuid::new_v4();
    let good = RecordBuilder::for_event(&task_history(&first, 1).unwrap()[0], Some(tx))
        .unwrap()
        .offset(1)
        .build();
    let broken = RecordBuilder::new(task_history(&second, 1).unwrap()[0].key(Some(tx)))
        .value(SerializedEvent::new("TaskCreated.v1", vec![0xFF]))
        .offset(2)
        .build();
    listener.handle(&good).await.unwrap();
    listener.handle(&broken).await.unwrap();

    let finished = RecordBuilder::new(MessageKey::transaction_finished(first.project, tx))
        .value(marker("ImportFinished"))
        .offset(3)
        .build();

    assert!(matches!(
        listener.handle(&finished).await,
        Err(ConsistencyError::Serialization(_))
    ));
    assert!(store.is_empty());
    assert_eq!(buffer.len(), 2);
}
