//! Outbound port: publishing keyed records to the log.
//!
//! # Implementations
//!
//! - `RecordingEventPublisher` in `eventloom-testing` - collects records in memory
//! - `RedpandaEventPublisher` in `eventloom-redpanda` - Kafka-compatible log

use crate::error::Result;
use crate::event::SerializedEvent;
use crate::record::MessageKey;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Publishes records with at-least-once semantics.
///
/// The partition is chosen by `key.root_context_identifier`, so all records
/// of one causal ordering domain keep their relative order.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so that command handlers and
/// business transactions can hold an `Arc<dyn EventPublisher>`.
pub trait EventPublisher: Send + Sync {
    /// Publish one record. `value` is `None` for a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Publish`](crate::error::ConsistencyError::Publish)
    /// if the log does not acknowledge the record.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a MessageKey,
        value: Option<&'a SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a MessageKey,
        value: Option<&'a SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        (**self).publish(topic, key, value)
    }
}
