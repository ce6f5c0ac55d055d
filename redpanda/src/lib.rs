//! Redpanda transport for Eventloom.
//!
//! This crate connects the consistency protocol to any Kafka-compatible log
//! (Redpanda, Apache Kafka, MSK) through rdkafka:
//!
//! - [`RedpandaEventPublisher`]: the producer side of
//!   [`EventPublisher`](eventloom_core::publisher::EventPublisher),
//!   partitioned by root context
//! - [`PipelineConsumer`]: a manual-commit consumer that drives an online or
//!   restore [`RecordHandler`](eventloom_core::consumer::RecordHandler) and
//!   implements redelivery by seeking back
//! - [`codec`]: the wire format shared by both
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits. Handlers are idempotent by
//! construction: every applied record is version-checked, so redelivered
//! records are skipped or rejected, never applied twice.
//!
//! # Example
//!
//! ```no_run
//! use eventloom_core::consumer::RecordHandler;
//! use eventloom_redpanda::PipelineConsumer;
//!
//! # async fn example(online: &dyn RecordHandler) -> eventloom_core::Result<()> {
//! let consumer = PipelineConsumer::builder()
//!     .brokers("localhost:9092")
//!     .group_id("task-service-online")
//!     .topics(["task"])
//!     .build()?;
//!
//! consumer.run(online).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod consumer;
pub mod publisher;

pub use codec::{EncodedRecord, KEY_HEADER, decode_message};
pub use consumer::{PipelineConsumer, PipelineConsumerBuilder};
pub use publisher::{RedpandaEventPublisher, RedpandaEventPublisherBuilder};
