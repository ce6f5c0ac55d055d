//! Recording [`EventPublisher`].

#![allow(clippy::unwrap_used)] // Test mock, panicking on poisoned lock is acceptable
#![allow(clippy::missing_panics_doc)] // Test mock

use crate::mocks::{FixedClock, test_clock};
use eventloom_core::environment::Clock;
use eventloom_core::error::{ConsistencyError, Result};
use eventloom_core::event::SerializedEvent;
use eventloom_core::publisher::EventPublisher;
use eventloom_core::record::{EventRecord, MessageKey};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Appends every published record to an in-memory log.
///
/// Each topic is a single partition (0) with offsets counting up from 0, so
/// the recorded records can be fed straight into a consumer pipeline.
///
/// # Example
///
/// ```
/// use eventloom_core::publisher::EventPublisher;
/// use eventloom_core::record::MessageKey;
/// use eventloom_testing::RecordingEventPublisher;
/// use uuid::Uuid;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let publisher = RecordingEventPublisher::new();
/// let key = MessageKey::transaction_started(Uuid::new_v4(), Uuid::new_v4());
/// publisher.publish("task", &key, None).await.unwrap();
///
/// assert_eq!(publisher.records()[0].offset, 0);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RecordingEventPublisher {
    records: Arc<RwLock<Vec<EventRecord>>>,
    failing: Arc<AtomicBool>,
    clock: FixedClock,
}

impl RecordingEventPublisher {
    /// Create a publisher stamping records with [`test_clock`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(test_clock())
    }

    /// Create a publisher stamping records with `clock`
    #[must_use]
    pub fn with_clock(clock: FixedClock) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
            clock,
        }
    }

    /// Make every following publish fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All recorded records in publish order
    #[must_use]
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.read().unwrap().clone()
    }

    /// Keys of all recorded records in publish order
    #[must_use]
    pub fn keys(&self) -> Vec<MessageKey> {
        self.records.read().unwrap().iter().map(|r| r.key.clone()).collect()
    }

    /// Number of recorded records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Check if nothing was published
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Forget all recorded records
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }
}

impl Default for RecordingEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for RecordingEventPublisher {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a MessageKey,
        value: Option<&'a SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ConsistencyError::Publish(format!(
                    "publishing to '{topic}' is disabled"
                )));
            }

            let mut records = self.records.write().unwrap();
            let offset = records.iter().filter(|r| r.topic == topic).count();
            records.push(EventRecord {
                topic: topic.to_string(),
                partition: 0,
                offset: i64::try_from(offset).unwrap_or(i64::MAX),
                key: key.clone(),
                value: value.cloned(),
                produced_at: self.clock.now(),
            });
            Ok(())
        })
    }
}
