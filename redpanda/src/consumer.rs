//! Manual-commit consumer driving a [`RecordHandler`].
//!
//! Each consumed message is decoded and handed to the handler:
//!
//! - [`Disposition::Commit`]: commit the offset synchronously, then
//!   [`RecordHandler::on_committed`] once the broker has acknowledged it
//! - [`Disposition::Withhold`] or a non-fatal error: wait
//!   `redelivery_delay`, then seek the partition back to the same offset so
//!   the record is consumed again
//! - fatal error: stop and return it
//!
//! Offsets are only ever committed for handled records, so a crash between
//! handling and committing redelivers the record (at-least-once).

use crate::codec::decode_message;
use eventloom_core::consumer::{Disposition, RecordHandler};
use eventloom_core::error::{ConsistencyError, Result};
use futures::StreamExt;
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::util::Timeout;
use std::future::Future;
use std::time::Duration;

/// One consumer group reading the event topics.
///
/// The online and restore pipelines each run their own `PipelineConsumer`
/// under a distinct group id.
///
/// # Example
///
/// ```no_run
/// use eventloom_redpanda::PipelineConsumer;
/// use std::time::Duration;
///
/// # fn example() -> eventloom_core::Result<()> {
/// let consumer = PipelineConsumer::builder()
///     .brokers("localhost:9092")
///     .group_id("task-service-restore")
///     .topics(["task"])
///     .redelivery_delay(Duration::from_millis(500))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct PipelineConsumer {
    consumer: StreamConsumer,
    group_id: String,
    redelivery_delay: Duration,
}

impl PipelineConsumer {
    /// Create a new builder for configuring the consumer.
    #[must_use]
    pub fn builder() -> PipelineConsumerBuilder {
        PipelineConsumerBuilder::default()
    }

    /// Consumer group id.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Feed records to `handler` until it fails fatally.
    ///
    /// # Errors
    ///
    /// The first fatal handler error.
    pub async fn run(&self, handler: &dyn RecordHandler) -> Result<()> {
        self.run_until(handler, std::future::pending()).await
    }

    /// Feed records to `handler` until `shutdown` completes or the handler
    /// fails fatally.
    ///
    /// # Errors
    ///
    /// The first fatal handler error.
    pub async fn run_until(
        &self,
        handler: &dyn RecordHandler,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let mut stream = self.consumer.stream();
        tokio::pin!(shutdown);

        tracing::info!(group_id = %self.group_id, handler = handler.name(), "Pipeline consumer started");

        loop {
            let message = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(group_id = %self.group_id, "Pipeline consumer shutting down");
                    return Ok(());
                }
                next = stream.next() => match next {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::warn!(group_id = %self.group_id, error = %e, "Failed to receive message");
                        continue;
                    }
                    None => return Ok(()),
                },
            };

            self.process(handler, &message).await?;
        }
    }

    async fn process(&self, handler: &dyn RecordHandler, message: &BorrowedMessage<'_>) -> Result<()> {
        match decode_message(message) {
            Ok(record) => match handler.handle(&record).await {
                Ok(Disposition::Commit) => {
                    // on_committed may only see offsets the broker has acknowledged
                    self.consumer
                        .commit_message(message, CommitMode::Sync)
                        .map_err(|e| ConsistencyError::Transport(format!("Failed to commit offset: {e}")))?;
                    return handler.on_committed(&record).await;
                }
                Ok(Disposition::Withhold) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(
                        handler = handler.name(),
                        position = %record.position(),
                        error = %e,
                        "Fatal error, stopping consumer"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        handler = handler.name(),
                        position = %record.position(),
                        error = %e,
                        "Record failed, will be redelivered"
                    );
                }
            },
            Err(e) => {
                tracing::error!(
                    handler = handler.name(),
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %e,
                    "Undecodable message, will be redelivered"
                );
            }
        }

        self.redeliver(message).await
    }

    async fn redeliver(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        tokio::time::sleep(self.redelivery_delay).await;
        self.consumer
            .seek(
                message.topic(),
                message.partition(),
                Offset::Offset(message.offset()),
                Timeout::After(Duration::from_secs(5)),
            )
            .map_err(|e| ConsistencyError::Transport(format!("Failed to seek for redelivery: {e}")))?;
        tracing::trace!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "Seeked back for redelivery"
        );
        Ok(())
    }
}

/// Builder for [`PipelineConsumer`].
#[derive(Default)]
pub struct PipelineConsumerBuilder {
    brokers: Option<String>,
    group_id: Option<String>,
    topics: Vec<String>,
    auto_offset_reset: Option<String>,
    redelivery_delay: Option<Duration>,
}

impl PipelineConsumerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group id.
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the topics to subscribe to.
    #[must_use]
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Where a new group starts reading: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`, so a fresh restore group reads the full log.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the wait before a withheld record is consumed again.
    ///
    /// Default: 500 milliseconds
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Build the consumer and subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Transport`] if brokers, group id or topics
    /// are missing, or the consumer cannot be created or subscribed.
    pub fn build(self) -> Result<PipelineConsumer> {
        let brokers = self
            .brokers
            .ok_or_else(|| ConsistencyError::Transport("Brokers not configured".to_string()))?;
        let group_id = self
            .group_id
            .ok_or_else(|| ConsistencyError::Transport("Consumer group not configured".to_string()))?;
        if self.topics.is_empty() {
            return Err(ConsistencyError::Transport("No topics configured".to_string()));
        }
        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "earliest".to_string());

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| ConsistencyError::Transport(format!("Failed to create consumer: {e}")))?;

        let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| ConsistencyError::Transport(format!("Failed to subscribe: {e}")))?;

        tracing::info!(
            topics = ?self.topics,
            group_id = %group_id,
            auto_offset_reset = %auto_offset_reset,
            "Subscribed to topics"
        );

        Ok(PipelineConsumer {
            consumer,
            group_id,
            redelivery_delay: self.redelivery_delay.unwrap_or(Duration::from_millis(500)),
        })
    }
}
