//! A sample `Task` aggregate and builders for inbound records.
//!
//! Tasks belong to a project; the project is the root context, so all
//! revisions of the tasks of one project share a partition.

use crate::mocks::test_clock;
use chrono::{DateTime, Utc};
use eventloom_core::aggregate::AggregateType;
use eventloom_core::environment::Clock;
use eventloom_core::error::Result;
use eventloom_core::event::SerializedEvent;
use eventloom_core::mapper::{AggregateEvent, SnapshotEventMapper};
use eventloom_core::record::{EventRecord, MessageKey};
use eventloom_core::snapshot::{SnapshotHeader, VersionedSnapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregate type tag of [`Task`].
pub const TASK: &str = "TASK";

/// Topic the sample records are placed on.
pub const TASK_TOPIC: &str = "task";

/// Actor stamped on fixture events.
pub const ACTOR: &str = "alice";

/// Sample snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identity, version and auditing.
    pub header: SnapshotHeader,
    /// Owning project, the root context.
    pub project: Uuid,
    /// Title.
    pub title: String,
    /// Whether the task is done.
    pub done: bool,
}

impl Task {
    /// A task that has not been created yet.
    #[must_use]
    pub fn new(project: Uuid, title: impl Into<String>) -> Self {
        Self {
            header: SnapshotHeader::initial(Uuid::new_v4()),
            project,
            title: title.into(),
            done: false,
        }
    }
}

impl VersionedSnapshot for Task {
    fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut SnapshotHeader {
        &mut self.header
    }

    fn aggregate_type(&self) -> AggregateType {
        AggregateType::new(TASK)
    }

    fn root_context_identifier(&self) -> Uuid {
        self.project
    }
}

/// `count` consecutive revisions of `task` (versions `task.version + 1` onwards).
///
/// The first revision of an uncreated task is `TaskCreated.v1`, all others
/// are `TaskUpdated.v1` with a changed title.
///
/// # Errors
///
/// Mapping errors for an invalid `task`.
pub fn task_history(task: &Task, count: usize) -> Result<Vec<AggregateEvent<Task>>> {
    let mapper = SnapshotEventMapper::new();
    let now = test_clock().now();
    let mut current = task.clone();
    let mut events = Vec::with_capacity(count);

    for n in 0..count {
        let event_type = if current.header.is_initial() {
            "TaskCreated.v1"
        } else {
            current.title = format!("{} ({n})", task.title);
            "TaskUpdated.v1"
        };
        let event = mapper.to_event(&current, event_type, ACTOR, now)?;
        current = event.aggregate.clone();
        events.push(event);
    }
    Ok(events)
}

/// Payload of a transaction marker.
#[must_use]
pub fn marker(event_type: &str) -> SerializedEvent {
    SerializedEvent::new(event_type, Vec::new())
}

/// Builder for [`EventRecord`]s.
///
/// Defaults: topic [`TASK_TOPIC`], partition 0, offset 0, no value (a
/// tombstone for aggregate keys), produced at [`test_clock`].
///
/// # Example
///
/// ```
/// use eventloom_core::record::MessageKey;
/// use eventloom_testing::fixtures::{RecordBuilder, marker};
/// use uuid::Uuid;
///
/// let record = RecordBuilder::new(MessageKey::transaction_started(Uuid::new_v4(), Uuid::new_v4()))
///     .offset(7)
///     .value(marker("ProjectImportStarted"))
///     .build();
///
/// assert_eq!(record.offset, 7);
/// assert!(record.transaction_id().is_some());
/// ```
#[derive(Clone, Debug)]
pub struct RecordBuilder {
    topic: String,
    partition: i32,
    offset: i64,
    key: MessageKey,
    value: Option<SerializedEvent>,
    produced_at: DateTime<Utc>,
}

impl RecordBuilder {
    /// Start a record with `key`.
    #[must_use]
    pub fn new(key: MessageKey) -> Self {
        Self {
            topic: TASK_TOPIC.to_string(),
            partition: 0,
            offset: 0,
            key,
            value: None,
            produced_at: test_clock().now(),
        }
    }

    /// Record carrying `event`, optionally inside a business transaction.
    ///
    /// # Errors
    ///
    /// Serialization errors of the payload.
    pub fn for_event(event: &AggregateEvent<Task>, transaction_id: Option<Uuid>) -> Result<Self> {
        Ok(Self::new(event.key(transaction_id)).value(event.to_serialized()?))
    }

    /// Set the topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the partition.
    #[must_use]
    pub const fn partition(mut self, partition: i32) -> Self {
        self.partition = partition;
        self
    }

    /// Set the offset.
    #[must_use]
    pub const fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn value(mut self, value: SerializedEvent) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the log timestamp.
    #[must_use]
    pub const fn produced_at(mut self, produced_at: DateTime<Utc>) -> Self {
        self.produced_at = produced_at;
        self
    }

    /// Build the record.
    #[must_use]
    pub fn build(self) -> EventRecord {
        EventRecord {
            topic: self.topic,
            partition: self.partition,
            offset: self.offset,
            key: self.key,
            value: self.value,
            produced_at: self.produced_at,
        }
    }
}
