//! Wire format of Eventloom records on a Kafka-compatible log.
//!
//! | Kafka field | Content |
//! |---|---|
//! | key | `root_context_identifier` as 16 raw UUID bytes (partition key) |
//! | header `eventloom-key` | bincode-encoded [`MessageKey`] |
//! | payload | bincode-encoded [`SerializedEvent`], absent for a tombstone |
//!
//! The Kafka key only routes the record; the full key travels in the header
//! so that every record of one root context lands on one partition regardless
//! of its aggregate or transaction.

use chrono::{DateTime, Utc};
use eventloom_core::error::{ConsistencyError, Result};
use eventloom_core::event::SerializedEvent;
use eventloom_core::record::{EventRecord, MessageKey};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};

/// Header carrying the encoded [`MessageKey`].
pub const KEY_HEADER: &str = "eventloom-key";

/// A record encoded for the producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Kafka key used for partitioning.
    pub partition_key: Vec<u8>,
    /// Encoded [`MessageKey`].
    pub key: Vec<u8>,
    /// Encoded payload; `None` for a tombstone.
    pub payload: Option<Vec<u8>>,
}

impl EncodedRecord {
    /// Encode `key` and `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Serialization`] if bincode fails.
    pub fn encode(key: &MessageKey, value: Option<&SerializedEvent>) -> Result<Self> {
        let payload = value
            .map(bincode::serialize::<SerializedEvent>)
            .transpose()
            .map_err(|e| ConsistencyError::Serialization(format!("Failed to encode payload: {e}")))?;

        Ok(Self {
            partition_key: key.root_context_identifier.as_bytes().to_vec(),
            key: key.to_bytes()?,
            payload,
        })
    }

    /// Kafka headers of this record.
    #[must_use]
    pub fn headers(&self) -> OwnedHeaders {
        OwnedHeaders::new().insert(Header {
            key: KEY_HEADER,
            value: Some(self.key.as_slice()),
        })
    }
}

/// Decode a consumed message into an [`EventRecord`].
///
/// A message without a broker timestamp is stamped with the time of decoding.
///
/// # Errors
///
/// Returns [`ConsistencyError::Serialization`] if the key header is missing
/// or either the key or the payload does not decode.
pub fn decode_message<M: Message>(message: &M) -> Result<EventRecord> {
    let raw_key = message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == KEY_HEADER)
                .and_then(|header| header.value)
        })
        .ok_or_else(|| {
            ConsistencyError::Serialization(format!(
                "Message {}/{}@{} has no {KEY_HEADER} header",
                message.topic(),
                message.partition(),
                message.offset()
            ))
        })?;

    let value = message
        .payload()
        .map(bincode::deserialize::<SerializedEvent>)
        .transpose()
        .map_err(|e| ConsistencyError::Serialization(format!("Failed to decode payload: {e}")))?;

    let produced_at = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    Ok(EventRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: MessageKey::from_bytes(raw_key)?,
        value,
        produced_at,
    })
}
