//! Replay coordination and restore dispatch

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use eventloom_core::aggregate::AggregateType;
use eventloom_core::error::{ConsistencyError, Result};
use eventloom_core::record::{EventRecord, MessageKey};
use eventloom_core::replay::{OffsetMarkStore, ReplayCoordinator, RestoreDispatcher, RestoreStrategy};
use eventloom_core::snapshot_store::SnapshotRestoreStrategy;
use eventloom_testing::fixtures::{RecordBuilder, TASK, Task, marker, task_history};
use eventloom_testing::{InMemoryOffsetMarkStore, InMemorySnapshotStore};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

#[derive(Default)]
struct CountingStrategy {
    restored: AtomicUsize,
}

impl RestoreStrategy for CountingStrategy {
    fn restore<'a>(&'a self, _record: &'a EventRecord) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.restored.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

#[tokio::test]
async fn restore_waits_for_online_mark() {
    let marks = Arc::new(InMemoryOffsetMarkStore::new());
    let coordinator = ReplayCoordinator::new(marks.clone());

    let before_any_commit = coordinator.ensure_not_ahead("task", 0, 0).await;
    assert!(matches!(
        before_any_commit,
        Err(ConsistencyError::AheadOfOnline { mark: None, .. })
    ));

    coordinator.record_committed("task", 0, 10).await.unwrap();

    assert!(coordinator.ensure_not_ahead("task", 0, 10).await.is_ok());
    assert!(coordinator.ensure_not_ahead("task", 0, 3).await.is_ok());
    assert!(matches!(
        coordinator.ensure_not_ahead("task", 0, 11).await,
        Err(ConsistencyError::AheadOfOnline {
            offset: 11,
            mark: Some(10),
            ..
        })
    ));
}

#[tokio::test]
async fn marks_are_per_partition() {
    let coordinator = ReplayCoordinator::new(Arc::new(InMemoryOffsetMarkStore::new()));
    coordinator.record_committed("task", 0, 10).await.unwrap();

    assert!(coordinator.ensure_not_ahead("task", 1, 0).await.is_err());
    assert!(coordinator.ensure_not_ahead("project", 0, 0).await.is_err());
}

#[tokio::test]
async fn mark_never_moves_backwards() {
    let marks = Arc::new(InMemoryOffsetMarkStore::new());
    let coordinator = ReplayCoordinator::new(marks.clone());

    coordinator.record_committed("task", 0, 10).await.unwrap();
    coordinator.record_committed("task", 0, 4).await.unwrap();

    assert_eq!(marks.offset("task", 0), Some(10));
    assert_eq!(marks.get("task", 0).await.unwrap().unwrap().offset, 10);
}

#[tokio::test]
async fn duplicate_strategy_registration_fails() {
    let result = RestoreDispatcher::builder()
        .register(AggregateType::new(TASK), Arc::new(CountingStrategy::default()))
        .unwrap()
        .register(AggregateType::new(TASK), Arc::new(CountingStrategy::default()));

    assert!(matches!(result, Err(ConsistencyError::DuplicateStrategy(_))));
}

#[tokio::test]
async fn dispatch_routes_by_aggregate_type_and_skips_markers() {
    let strategy = Arc::new(CountingStrategy::default());
    let dispatcher = RestoreDispatcher::builder()
        .register(AggregateType::new(TASK), strategy.clone())
        .unwrap()
        .build();
    assert!(dispatcher.handles(&AggregateType::new(TASK)));

    let task = Task::new(Uuid::new_v4(), "Restore me");
    let event = task_history(&task, 1).unwrap().remove(0);
    dispatcher
        .dispatch(&RecordBuilder::for_event(&event, None).unwrap().build())
        .await
        .unwrap();

    let started = RecordBuilder::new(MessageKey::transaction_started(task.project, Uuid::new_v4()))
        .value(marker("ImportStarted"))
        .build();
    dispatcher.dispatch(&started).await.unwrap();

    assert_eq!(strategy.restored.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispatch_of_unknown_aggregate_type_fails() {
    let dispatcher = RestoreDispatcher::builder().build();
    let task = Task::new(Uuid::new_v4(), "Orphan");
    let event = task_history(&task, 1).unwrap().remove(0);

    let result = dispatcher
        .dispatch(&RecordBuilder::for_event(&event, None).unwrap().build())
        .await;

    assert!(matches!(result, Err(ConsistencyError::UnknownAggregateType(_))));
}

#[tokio::test]
async fn snapshot_restore_strategy_replays_history_idempotently() {
    let store = Arc::new(InMemorySnapshotStore::<Task>::new(TASK));
    let dispatcher = RestoreDispatcher::builder()
        .register(
            AggregateType::new(TASK),
            Arc::new(SnapshotRestoreStrategy::new(store.clone())),
        )
        .unwrap()
        .build();

    let task = Task::new(Uuid::new_v4(), "Replay");
    let history = task_history(&task, 3).unwrap();
    let records: Vec<EventRecord> = history
        .iter()
        .enumerate()
        .map(|(offset, event)| {
            RecordBuilder::for_event(event, None)
                .unwrap()
                .offset(i64::try_from(offset).unwrap())
                .build()
        })
        .collect();

    for record in records.iter().chain(records.iter()) {
        dispatcher.dispatch(record).await.unwrap();
    }

    let restored = store.get(task.header.identifier).unwrap();
    assert_eq!(restored.header.version, 2);
    assert_eq!(store.applied().len(), 3);
}
