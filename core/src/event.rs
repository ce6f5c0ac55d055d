//! Event payloads as the protocol sees them: a type tag plus opaque bytes.
//!
//! The consistency protocol never looks inside a payload. Aggregate events
//! are encoded by [`AggregateEvent::to_serialized`](crate::mapper::AggregateEvent::to_serialized)
//! and decoded with [`SerializedEvent::decode`]; both use `bincode`.
//!
//! # Event Naming Convention
//!
//! `event_type` is a stable identifier including a version suffix
//! (`"TaskCreated.v1"`), which lets the payload schema evolve.

use crate::error::{ConsistencyError, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;

/// An event payload ready for the log: type tag and opaque bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., `"TaskCreated.v1"`).
    pub event_type: String,

    /// The serialized event data.
    pub data: Vec<u8>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    ///
    /// # Examples
    ///
    /// ```
    /// use eventloom_core::event::SerializedEvent;
    ///
    /// let event = SerializedEvent::new("TaskCreated.v1", vec![1, 2, 3, 4]);
    /// assert_eq!(event.data.len(), 4);
    /// ```
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Decode the payload into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Serialization`] if the bytes do not decode.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        bincode::deserialize(&self.data).map_err(|e| {
            ConsistencyError::Serialization(format!(
                "Failed to decode {} payload: {e}",
                self.event_type
            ))
        })
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
