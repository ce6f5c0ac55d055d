//! [`EventPublisher`] on a Kafka-compatible log.

use crate::codec::EncodedRecord;
use eventloom_core::error::{ConsistencyError, Result};
use eventloom_core::event::SerializedEvent;
use eventloom_core::publisher::EventPublisher;
use eventloom_core::record::MessageKey;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Publishes Eventloom records with rdkafka.
///
/// The producer is idempotent, so broker-side retries never reorder or
/// duplicate records of one partition.
///
/// # Example
///
/// ```no_run
/// use eventloom_redpanda::RedpandaEventPublisher;
/// use std::time::Duration;
///
/// # fn example() -> eventloom_core::Result<()> {
/// let publisher = RedpandaEventPublisher::builder()
///     .brokers("localhost:9092")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventPublisher {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
}

impl RedpandaEventPublisher {
    /// Create a publisher with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Transport`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the publisher.
    #[must_use]
    pub fn builder() -> RedpandaEventPublisherBuilder {
        RedpandaEventPublisherBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaEventPublisher`].
#[derive(Default)]
pub struct RedpandaEventPublisherBuilder {
    brokers: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaEventPublisherBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`
    /// or `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set how long a publish waits for acknowledgement.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the publisher.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Transport`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventPublisher> {
        let brokers = self
            .brokers
            .ok_or_else(|| ConsistencyError::Transport("Brokers not configured".to_string()))?;
        let compression = self.compression.as_deref().unwrap_or("none");
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", compression)
            .create()
            .map_err(|e| ConsistencyError::Transport(format!("Failed to create producer: {e}")))?;

        tracing::info!(brokers = %brokers, compression, "RedpandaEventPublisher created");

        Ok(RedpandaEventPublisher {
            producer,
            brokers,
            timeout,
        })
    }
}

impl EventPublisher for RedpandaEventPublisher {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a MessageKey,
        value: Option<&'a SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let encoded = EncodedRecord::encode(key, value)?;

            let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic)
                .key(encoded.partition_key.as_slice())
                .headers(encoded.headers());
            if let Some(payload) = &encoded.payload {
                record = record.payload(payload.as_slice());
            }

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(topic, partition, offset, key = %key, "Record published");
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic, key = %key, error = %kafka_error, "Failed to publish record");
                    Err(ConsistencyError::Publish(format!("{topic}: {kafka_error}")))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventPublisher>();
        assert_sync::<RedpandaEventPublisher>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaEventPublisher::builder().build();

        assert!(matches!(result, Err(ConsistencyError::Transport(_))));
    }
}
