//! Domain event trait and the stored event form.
//!
//! Events are named, immutable, serializable facts. A domain event type
//! carries a stable type tag ([`DomainEvent::EVENT_TYPE`]) used for handler
//! dispatch and storage routing; payloads are serialized with `bincode` for
//! compact binary storage, with optional JSON metadata alongside.
//!
//! # Event Naming Convention
//!
//! The type tag should be a stable string with a version suffix so event
//! schemas can evolve over time:
//!
//! - `"OrderPlaced.v1"`
//! - `"OrderShipped.v2"` (after a schema change)

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event encoding and decoding.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event to bytes.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize an event from bytes.
    #[error("Failed to deserialize event: {0}")]
    Deserialization(String),

    /// A recorded event was decoded as the wrong domain event type.
    #[error("Event type mismatch: expected '{expected}', found '{found}'")]
    TypeMismatch {
        /// The type tag the caller asked to decode.
        expected: &'static str,
        /// The type tag actually recorded.
        found: String,
    },
}

/// An immutable domain fact that can be recorded in a commit and replayed
/// to reconstruct aggregate state.
///
/// The type tag is an associated constant (not a method) so that handler
/// registries can key on an event type without holding an instance.
///
/// # Examples
///
/// ```
/// use commitstream_core::event::DomainEvent;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: String,
///     total_cents: u64,
/// }
///
/// impl DomainEvent for OrderPlaced {
///     const EVENT_TYPE: &'static str = "OrderPlaced.v1";
/// }
/// ```
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type tag for this event, including a schema version suffix.
    const EVENT_TYPE: &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// serialized (rare with bincode).
    fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the bytes are corrupt or
    /// were produced by an incompatible schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

/// The stored form of a domain event: type tag, bincode payload, and
/// optional metadata.
///
/// A recorded event carries no identity beyond its position in the commit
/// stream. Common metadata fields:
/// - `correlation_id`: links related events across aggregates
/// - `causation_id`: links cause-and-effect events
/// - `user_id`: the actor who triggered the event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// The event type tag (e.g. `"OrderPlaced.v1"`).
    event_type: String,

    /// The bincode-serialized event payload.
    data: Vec<u8>,

    /// Optional opaque metadata; never interpreted by the core.
    metadata: Option<serde_json::Value>,
}

impl RecordedEvent {
    /// Create a recorded event from raw parts.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Record a typed domain event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn from_event<E: DomainEvent>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: E::EVENT_TYPE.to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }

    /// Decode the payload back into a typed domain event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::TypeMismatch`] if this record carries a
    /// different event type, or [`EventError::Deserialization`] if the
    /// payload cannot be decoded.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, EventError> {
        if self.event_type != E::EVENT_TYPE {
            return Err(EventError::TypeMismatch {
                expected: E::EVENT_TYPE,
                found: self.event_type.clone(),
            });
        }
        E::from_bytes(&self.data)
    }

    /// The event type tag.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The raw serialized payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The optional metadata attached at record time.
    #[must_use]
    pub const fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }
}

impl fmt::Display for RecordedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RecordedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
