//! Integration tests for the online and restore pipelines

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use eventloom_core::aggregate::{AggregateIdentifier, AggregateType};
use eventloom_core::buffer::{BufferedTransactionEvent, TransactionEventBuffer};
use eventloom_core::consumer::{Disposition, RecordHandler};
use eventloom_core::environment::Clock;
use eventloom_core::mapper::SnapshotEventMapper;
use eventloom_core::record::{EventRecord, MessageKey};
use eventloom_core::replay::{ReplayCoordinator, RestoreDispatcher};
use eventloom_core::snapshot_store::SnapshotRestoreStrategy;
use eventloom_core::validation::ValidationMode;
use eventloom_runtime::{
    BufferStalenessMonitor, BusinessTransactionAwareListener, OnlinePipeline, RestorePipeline,
    SnapshotStoreProcessor,
};
use eventloom_testing::fixtures::{RecordBuilder, TASK, Task, marker, task_history};
use eventloom_testing::{
    InMemoryOffsetMarkStore, InMemorySnapshotStore, InMemoryTransactionEventBuffer, test_clock,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Test Fixtures
// ============================================================================

type TaskStore = InMemorySnapshotStore<Task>;

struct Harness {
    online_store: Arc<TaskStore>,
    restore_store: Arc<TaskStore>,
    marks: Arc<InMemoryOffsetMarkStore>,
    online: OnlinePipeline<SnapshotStoreProcessor<TaskStore>>,
    restore: RestorePipeline,
}

fn harness() -> Harness {
    let online_store = Arc::new(TaskStore::new(TASK));
    let restore_store = Arc::new(TaskStore::new(TASK));
    let marks = Arc::new(InMemoryOffsetMarkStore::new());
    let coordinator = ReplayCoordinator::new(marks.clone());

    let listener = BusinessTransactionAwareListener::new(
        Arc::new(SnapshotStoreProcessor::new(online_store.clone(), ValidationMode::Online)),
        Arc::new(InMemoryTransactionEventBuffer::new()),
        "task-service",
        Arc::new(test_clock()),
    );
    let dispatcher = RestoreDispatcher::builder()
        .register(
            AggregateType::new(TASK),
            Arc::new(SnapshotRestoreStrategy::new(restore_store.clone())),
        )
        .unwrap()
        .build();

    Harness {
        online_store,
        restore_store,
        marks,
        online: OnlinePipeline::new(listener, coordinator.clone()),
        restore: RestorePipeline::new(coordinator, dispatcher),
    }
}

fn history(count: usize) -> (Task, Vec<EventRecord>) {
    let task = Task::new(Uuid::new_v4(), "Pipeline");
    let records = task_history(&task, count)
        .unwrap()
        .iter()
        .enumerate()
        .map(|(offset, event)| {
            RecordBuilder::for_event(event, None)
                .unwrap()
                .offset(i64::try_from(offset).unwrap())
                .build()
        })
        .collect();
    (task, records)
}

/// What a transport does with a record: handle, then commit and report.
async fn deliver(handler: &dyn RecordHandler, record: &EventRecord) -> Disposition {
    let disposition = handler.handle(record).await.unwrap();
    if disposition == Disposition::Commit {
        handler.on_committed(record).await.unwrap();
    }
    disposition
}

// ============================================================================
// Online
// ============================================================================

#[tokio::test]
async fn online_commit_advances_the_offset_mark() {
    let h = harness();
    let (task, records) = history(2);

    for record in &records {
        assert_eq!(deliver(&h.online, record).await, Disposition::Commit);
    }

    assert_eq!(h.marks.offset("task", 0), Some(1));
    assert_eq!(h.online_store.get(task.header.identifier).unwrap().header.version, 1);
    assert_eq!(h.online.name(), "online");
}

#[tokio::test]
async fn online_redelivery_after_crash_is_committed_once() {
    let h = harness();
    let (task, records) = history(2);

    // Applied, then the process dies before the offset commit.
    assert_eq!(h.online.process(&records[0]).await.unwrap(), Disposition::Commit);
    assert_eq!(h.marks.offset("task", 0), None);

    let redeliveries = [
        deliver(&h.online, &records[0]).await,
        deliver(&h.online, &records[0]).await,
        deliver(&h.online, &records[0]).await,
    ];

    assert_eq!(redeliveries, [Disposition::Commit; 3]);
    assert_eq!(h.online_store.applied().len(), 1, "redelivery must not apply twice");
    assert_eq!(h.marks.offset("task", 0), Some(0));

    assert_eq!(deliver(&h.online, &records[1]).await, Disposition::Commit);
    assert_eq!(h.online_store.get(task.header.identifier).unwrap().header.version, 1);
    assert_eq!(h.marks.offset("task", 0), Some(1));
}

#[tokio::test]
async fn online_redelivered_tombstone_is_committed() {
    let h = harness();
    let (task, records) = history(1);
    deliver(&h.online, &records[0]).await;

    let key = SnapshotEventMapper::new()
        .tombstone_key(&h.online_store.get(task.header.identifier).unwrap())
        .unwrap();
    let tombstone = RecordBuilder::new(key).offset(1).build();

    assert_eq!(deliver(&h.online, &tombstone).await, Disposition::Commit);
    assert_eq!(deliver(&h.online, &tombstone).await, Disposition::Commit);

    assert!(h.online_store.is_empty());
    assert_eq!(h.online_store.applied().len(), 2);
    assert_eq!(h.marks.offset("task", 0), Some(1));
}

#[tokio::test]
async fn online_version_gap_stops_the_pipeline() {
    let h = harness();
    let (_, records) = history(3);
    deliver(&h.online, &records[0]).await;

    let error = h.online.process(&records[2]).await.unwrap_err();

    assert!(error.is_fatal());
    assert_eq!(h.marks.offset("task", 0), Some(0));
}

// ============================================================================
// Restore
// ============================================================================

#[tokio::test]
async fn restore_is_withheld_until_online_catches_up() {
    let h = harness();
    let (task, records) = history(3);

    assert_eq!(deliver(&h.restore, &records[0]).await, Disposition::Withhold);
    assert!(h.restore_store.is_empty());

    deliver(&h.online, &records[0]).await;
    deliver(&h.online, &records[1]).await;

    assert_eq!(deliver(&h.restore, &records[0]).await, Disposition::Commit);
    assert_eq!(deliver(&h.restore, &records[1]).await, Disposition::Commit);
    assert_eq!(deliver(&h.restore, &records[2]).await, Disposition::Withhold);

    let restored = h.restore_store.get(task.header.identifier).unwrap();
    assert_eq!(restored.header.version, 1);
    assert_eq!(h.restore.name(), "restore");
}

#[tokio::test]
async fn restore_does_not_move_the_offset_mark() {
    let h = harness();
    let (_, records) = history(2);
    deliver(&h.online, &records[0]).await;

    deliver(&h.restore, &records[0]).await;

    assert_eq!(h.marks.offset("task", 0), Some(0));
}

#[tokio::test]
async fn restore_skips_aggregate_types_without_strategy() {
    let h = harness();
    let (_, records) = history(1);
    let project = AggregateIdentifier::new("PROJECT", Uuid::new_v4(), 0);
    let foreign = RecordBuilder::new(MessageKey::aggregate(project.identifier(), project))
        .value(records[0].value.clone().unwrap())
        .build();

    // The online task processor ignores the record but still commits it.
    assert_eq!(deliver(&h.online, &foreign).await, Disposition::Commit);

    assert_eq!(deliver(&h.restore, &foreign).await, Disposition::Commit);
    assert!(h.restore_store.is_empty());
    assert!(h.online_store.is_empty());
}

#[tokio::test]
async fn restore_waits_for_unreleased_business_transaction() {
    let h = harness();
    let project = Uuid::new_v4();
    let tx = Uuid::new_v4();
    let grouped = Task::new(project, "Grouped");
    let solo = Task::new(project, "Solo");

    let records = vec![
        RecordBuilder::new(MessageKey::transaction_started(project, tx))
            .value(marker("ImportStarted"))
            .offset(0)
            .build(),
        RecordBuilder::for_event(&task_history(&grouped, 1).unwrap()[0], Some(tx))
            .unwrap()
            .offset(1)
            .build(),
        RecordBuilder::for_event(&task_history(&solo, 1).unwrap()[0], None)
            .unwrap()
            .offset(2)
            .build(),
    ];
    for record in &records {
        assert_eq!(deliver(&h.online, record).await, Disposition::Commit);
    }

    // Everything is committed, but the parked transaction holds the mark back.
    assert_eq!(h.marks.offset("task", 0), None);
    assert!(h.online_store.get(grouped.header.identifier).is_none());
    for record in &records {
        assert_eq!(deliver(&h.restore, record).await, Disposition::Withhold);
    }
    assert!(h.restore_store.is_empty());

    let finished = RecordBuilder::new(MessageKey::transaction_finished(project, tx))
        .value(marker("ImportFinished"))
        .offset(3)
        .build();
    assert_eq!(deliver(&h.online, &finished).await, Disposition::Commit);
    assert_eq!(h.marks.offset("task", 0), Some(3));

    for record in records.iter().chain([&finished]) {
        assert_eq!(deliver(&h.restore, record).await, Disposition::Commit);
    }
    assert!(h.online_store.get(grouped.header.identifier).is_some());
    assert!(h.restore_store.get(grouped.header.identifier).is_some());
    assert!(h.restore_store.get(solo.header.identifier).is_some());
}

#[tokio::test]
async fn offset_mark_stops_before_the_oldest_parked_record() {
    let h = harness();
    let (_, records) = history(2);
    let tx = Uuid::new_v4();
    let parked = Task::new(Uuid::new_v4(), "Parked");
    let started = RecordBuilder::new(MessageKey::transaction_started(parked.project, tx))
        .value(marker("ImportStarted"))
        .offset(2)
        .build();
    let later = RecordBuilder::for_event(&task_history(&Task::new(Uuid::new_v4(), "Later"), 1).unwrap()[0], None)
        .unwrap()
        .offset(3)
        .build();
    let other_partition = RecordBuilder::for_event(&task_history(&Task::new(Uuid::new_v4(), "Elsewhere"), 1).unwrap()[0], None)
        .unwrap()
        .partition(1)
        .offset(9)
        .build();

    for record in records.iter().chain([&started, &later, &other_partition]) {
        deliver(&h.online, record).await;
    }

    assert_eq!(h.marks.offset("task", 0), Some(1));
    assert_eq!(h.marks.offset("task", 1), Some(9), "other partitions are not held back");
}

// ============================================================================
// Staleness monitor
// ============================================================================

#[tokio::test]
async fn monitor_counts_rows_older_than_threshold() {
    let buffer = Arc::new(InMemoryTransactionEventBuffer::new());
    let (_, records) = history(1);
    let tx = Uuid::new_v4();
    let row = BufferedTransactionEvent::from_record(&records[0], tx, "task-service", test_clock().now()).unwrap();
    buffer.save(&row).await.unwrap();

    let fresh = BufferStalenessMonitor::new(
        buffer.clone(),
        Arc::new(test_clock().advanced_by(chrono::Duration::seconds(30))),
        Duration::from_secs(60),
        Duration::from_secs(1),
    );
    assert_eq!(fresh.check().await.unwrap(), 0);

    let stale = BufferStalenessMonitor::new(
        buffer,
        Arc::new(test_clock().advanced_by(chrono::Duration::minutes(10))),
        Duration::from_secs(60),
        Duration::from_secs(1),
    );
    assert_eq!(stale.check().await.unwrap(), 1);
}

#[tokio::test]
async fn monitor_reports_head_of_line_per_processor() {
    let buffer = Arc::new(InMemoryTransactionEventBuffer::new());
    let tx = Uuid::new_v4();
    for (owner, offset) in [("task-service", 5), ("task-service", 3), ("reporting", 1)] {
        let record = RecordBuilder::for_event(&task_history(&Task::new(Uuid::new_v4(), "Parked"), 1).unwrap()[0], Some(tx))
            .unwrap()
            .offset(offset)
            .build();
        let row = BufferedTransactionEvent::from_record(&record, tx, owner, test_clock().now()).unwrap();
        buffer.save(&row).await.unwrap();
    }

    let monitor = BufferStalenessMonitor::new(
        buffer,
        Arc::new(test_clock().advanced_by(chrono::Duration::minutes(10))),
        Duration::from_secs(60),
        Duration::from_secs(1),
    )
    .watching(["task-service", "search"]);

    let (head, age) = monitor.head_of_line("task-service").await.unwrap().unwrap();
    assert_eq!(head.offset, 3);
    assert_eq!(head.transaction_id, tx);
    assert_eq!(age, Duration::from_secs(600));

    assert!(monitor.head_of_line("search").await.unwrap().is_none());
    assert_eq!(monitor.check().await.unwrap(), 3);
}

#[tokio::test]
async fn monitor_stops_on_shutdown() {
    let monitor = BufferStalenessMonitor::new(
        Arc::new(InMemoryTransactionEventBuffer::new()),
        Arc::new(test_clock()),
        Duration::from_secs(60),
        Duration::from_millis(5),
    );
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(monitor.run_until(async {
        let _ = rx.await;
    }));

    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("monitor should stop")
        .unwrap();
}
