//! Integration tests for the Redpanda transport with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Published records come back with their full key and payload
//! - Records of one root context keep their order
//! - Withheld records are redelivered, committed ones are not
//! - A fatal handler error stops the consumer
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p eventloom-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use eventloom_core::consumer::{Disposition, RecordHandler};
use eventloom_core::error::{ConsistencyError, Result};
use eventloom_core::publisher::EventPublisher;
use eventloom_core::record::{EventRecord, MessageKey};
use eventloom_redpanda::{PipelineConsumer, RedpandaEventPublisher};
use eventloom_testing::fixtures::{Task, marker, task_history};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use tokio::sync::Notify;
use uuid::Uuid;

/// Withholds the first delivery of every offset, commits the second.
#[derive(Default)]
struct WithholdOnce {
    seen: Mutex<HashSet<i64>>,
    deliveries: Mutex<Vec<i64>>,
    committed: Mutex<Vec<EventRecord>>,
    expected: usize,
    done: Notify,
}

impl WithholdOnce {
    fn expecting(expected: usize) -> Self {
        Self {
            expected,
            ..Self::default()
        }
    }
}

impl RecordHandler for WithholdOnce {
    fn name(&self) -> &'static str {
        "withhold-once"
    }

    fn handle<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Disposition>> + Send + 'a>> {
        Box::pin(async move {
            self.deliveries.lock().unwrap().push(record.offset);
            if self.seen.lock().unwrap().insert(record.offset) {
                Ok(Disposition::Withhold)
            } else {
                Ok(Disposition::Commit)
            }
        })
    }

    fn on_committed<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut committed = self.committed.lock().unwrap();
            committed.push(record.clone());
            if committed.len() == self.expected {
                self.done.notify_one();
            }
            Ok(())
        })
    }
}

/// Fails fatally on the first record.
struct FailFatally;

impl RecordHandler for FailFatally {
    fn name(&self) -> &'static str {
        "fail-fatally"
    }

    fn handle<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Disposition>> + Send + 'a>> {
        Box::pin(async move {
            Err(ConsistencyError::FatalOrderingViolation {
                aggregate_type: "TASK".to_string(),
                identifier: Uuid::nil(),
                snapshot_version: -1,
                event_version: u64::try_from(record.offset).unwrap_or(0),
            })
        })
    }
}

/// Start Kafka and return its container and broker address.
async fn start_kafka() -> anyhow::Result<(testcontainers::ContainerAsync<Kafka>, String)> {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await?;

    let host = kafka.get_host().await?;
    let port = kafka.get_host_port_ipv4(KAFKA_PORT).await?;
    Ok((kafka, format!("{host}:{port}")))
}

/// Publish until the broker accepts, which also creates the topic.
async fn wait_for_topic(publisher: &RedpandaEventPublisher, topic: &str) {
    let key = MessageKey::transaction_started(Uuid::new_v4(), Uuid::new_v4());
    let warmup = marker("Warmup");
    for attempt in 1..=60 {
        if publisher.publish(topic, &key, Some(&warmup)).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Kafka failed to accept records on {topic}");
    }
}

#[tokio::test]
#[ignore]
async fn test_withheld_records_are_redelivered_in_order() -> anyhow::Result<()> {
    let (_kafka, brokers) = start_kafka().await?;
    let publisher = RedpandaEventPublisher::new(&brokers)?;
    wait_for_topic(&publisher, "task-redelivery").await;

    let task = Task::new(Uuid::new_v4(), "Ship it");
    let history = task_history(&task, 3)?;
    for event in &history {
        publisher
            .publish("task-redelivery", &event.key(None), Some(&event.to_serialized()?))
            .await?;
    }

    let consumer = PipelineConsumer::builder()
        .brokers(&brokers)
        .group_id("redelivery-test")
        .topics(["task-redelivery"])
        .redelivery_delay(Duration::from_millis(50))
        .build()?;

    // One warmup marker plus three task events
    let handler = WithholdOnce::expecting(4);
    let outcome = tokio::time::timeout(
        Duration::from_secs(30),
        consumer.run_until(&handler, handler.done.notified()),
    )
    .await;
    assert!(matches!(outcome, Ok(Ok(()))), "Consumer did not finish: {outcome:?}");

    let committed = handler.committed.lock().unwrap();
    let keys: Vec<MessageKey> = committed
        .iter()
        .filter(|r| !r.key.is_marker())
        .map(|r| r.key.clone())
        .collect();
    let expected: Vec<MessageKey> = history.iter().map(|e| e.key(None)).collect();
    assert_eq!(keys, expected);
    assert!(committed.iter().all(|r| r.partition == committed[0].partition));

    let deliveries = handler.deliveries.lock().unwrap();
    assert_eq!(deliveries.len(), 8, "Every record should be delivered twice");
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_tombstone_round_trip() -> anyhow::Result<()> {
    let (_kafka, brokers) = start_kafka().await?;
    let publisher = RedpandaEventPublisher::new(&brokers)?;
    wait_for_topic(&publisher, "task-tombstone").await;

    let task = Task::new(Uuid::new_v4(), "Delete me");
    let created = task_history(&task, 1)?.remove(0);
    let tombstone_key = eventloom_core::mapper::SnapshotEventMapper::new().tombstone_key(&created.aggregate)?;
    publisher.publish("task-tombstone", &tombstone_key, None).await?;

    let consumer = PipelineConsumer::builder()
        .brokers(&brokers)
        .group_id("tombstone-test")
        .topics(["task-tombstone"])
        .redelivery_delay(Duration::from_millis(50))
        .build()?;

    let handler = WithholdOnce::expecting(2);
    tokio::time::timeout(
        Duration::from_secs(30),
        consumer.run_until(&handler, handler.done.notified()),
    )
    .await??;

    let committed = handler.committed.lock().unwrap();
    let tombstone = committed.iter().find(|r| !r.key.is_marker()).expect("tombstone");
    assert!(tombstone.is_tombstone());
    assert_eq!(tombstone.key, tombstone_key);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_fatal_error_stops_consumer() -> anyhow::Result<()> {
    let (_kafka, brokers) = start_kafka().await?;
    let publisher = RedpandaEventPublisher::new(&brokers)?;
    wait_for_topic(&publisher, "task-fatal").await;

    let consumer = PipelineConsumer::builder()
        .brokers(&brokers)
        .group_id("fatal-test")
        .topics(["task-fatal"])
        .build()?;

    let result = tokio::time::timeout(Duration::from_secs(30), consumer.run(&FailFatally)).await?;

    assert!(matches!(result, Err(ConsistencyError::FatalOrderingViolation { .. })));
    Ok(())
}
