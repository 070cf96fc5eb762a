//! Integration events and the envelope they travel in.
//!
//! Integration events are the facts one service publishes for other services to
//! consume. They cross process boundaries, so they are wrapped in an
//! [`EventEnvelope`] that carries everything a consumer needs to route,
//! deduplicate, and audit the event without understanding its payload.
//!
//! # Design
//!
//! Payloads are serialized using `bincode`. The envelope itself is also
//! bincode-encoded when it goes over the wire ([`EventEnvelope::to_wire`]).
//! A consumer only decodes the payload after it has resolved a handler for
//! the envelope's event type.
//!
//! # Example
//!
//! ```
//! use booking_pipeline_core::event::{CorrelationId, EventEnvelope, IntegrationEvent};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct UserCreated {
//!     passport_number: String,
//!     name: String,
//! }
//!
//! impl IntegrationEvent for UserCreated {
//!     const EVENT_TYPE: &'static str = "UserCreated";
//! }
//!
//! let event = UserCreated { passport_number: "123456789".into(), name: "Sam".into() };
//! let envelope =
//!     EventEnvelope::from_event(&event, CorrelationId::new(), chrono::Utc::now()).unwrap();
//! assert_eq!(envelope.event_type(), "UserCreated");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Current envelope schema version written by this crate.
pub const ENVELOPE_VERSION: u16 = 1;

/// Error types for event and envelope operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize an event or envelope to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize an event or envelope from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// The envelope has no event type.
    #[error("Envelope event type must not be empty")]
    MissingEventType,

    /// The envelope carries the nil correlation id.
    #[error("Envelope correlation id must not be nil")]
    MissingCorrelationId,

    /// The envelope was written by an incompatible schema version.
    #[error("Unsupported envelope version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found on the wire
        found: u16,
        /// Version this build understands
        expected: u16,
    },

    /// The payload was decoded as a different event type than it carries.
    #[error("Event type mismatch: envelope carries '{actual}', decoded as '{expected}'")]
    TypeMismatch {
        /// Type requested by the caller
        expected: String,
        /// Type stored in the envelope
        actual: String,
    },
}

/// Identifier of one logical occurrence of an integration event.
///
/// Redelivery of the same occurrence reuses the same id, which is what makes
/// consumer-side deduplication possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Create a new random correlation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Whether this is the nil UUID (never a valid correlation id).
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event published by one service for consumption by others.
///
/// # Event Naming Convention
///
/// `EVENT_TYPE` is the stable routing name of the event. It selects the broker
/// topic and the consumer-side handler, so it must never change once events of
/// that type have been published. Introduce a new type (e.g. `"UserCreatedV2"`)
/// for incompatible schema changes.
///
/// # Thread Safety
///
/// Events must be `Send + Sync + 'static` to be moved between tasks.
pub trait IntegrationEvent: Send + Sync + 'static {
    /// Routing name of this event type (e.g. `"UserCreated"`).
    const EVENT_TYPE: &'static str;

    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupted or
    /// describe a different schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// Immutable, versioned wrapper around an integration event.
///
/// Fields are private: once created an envelope cannot be altered, only
/// cloned. Redelivering an envelope therefore always reuses its correlation id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    version: u16,
    event_type: String,
    correlation_id: CorrelationId,
    payload: Vec<u8>,
    produced_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Create a new envelope from an already-encoded payload.
    ///
    /// The envelope is not validated here; see [`EventEnvelope::validate`].
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        correlation_id: CorrelationId,
        payload: Vec<u8>,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            event_type: event_type.into(),
            correlation_id,
            payload,
            produced_at,
        }
    }

    /// Wrap a typed integration event.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: IntegrationEvent + Serialize>(
        event: &E,
        correlation_id: CorrelationId,
        produced_at: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        Ok(Self::new(
            event.event_type(),
            correlation_id,
            event.to_bytes()?,
            produced_at,
        ))
    }

    /// Check the envelope invariants required for publication.
    ///
    /// # Errors
    ///
    /// - `EventError::MissingEventType` if the event type is empty or blank
    /// - `EventError::MissingCorrelationId` if the correlation id is nil
    pub fn validate(&self) -> Result<(), EventError> {
        if self.event_type.trim().is_empty() {
            return Err(EventError::MissingEventType);
        }
        if self.correlation_id.is_nil() {
            return Err(EventError::MissingCorrelationId);
        }
        Ok(())
    }

    /// Envelope schema version.
    #[must_use]
    pub const fn version(&self) -> u16 {
        self.version
    }

    /// Routing name of the wrapped event.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Correlation id of this occurrence.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Encoded event payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// When the producing service created the envelope.
    #[must_use]
    pub const fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }

    /// Decode the payload as `E`, checking the event type first.
    ///
    /// # Errors
    ///
    /// - `EventError::TypeMismatch` if the envelope carries a different type
    /// - `EventError::DeserializationError` if the payload is malformed
    pub fn decode<E: IntegrationEvent + DeserializeOwned>(&self) -> Result<E, EventError> {
        if self.event_type != E::EVENT_TYPE {
            return Err(EventError::TypeMismatch {
                expected: E::EVENT_TYPE.to_string(),
                actual: self.event_type.clone(),
            });
        }
        E::from_bytes(&self.payload)
    }

    /// Encode the whole envelope for transport.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if encoding fails.
    pub fn to_wire(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode an envelope received from transport.
    ///
    /// # Errors
    ///
    /// - `EventError::DeserializationError` if the bytes are not an envelope
    /// - `EventError::UnsupportedVersion` if the envelope schema is unknown
    pub fn from_wire(bytes: &[u8]) -> Result<Self, EventError> {
        let envelope: Self = bincode::deserialize(bytes)
            .map_err(|e| EventError::DeserializationError(e.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(EventError::UnsupportedVersion {
                found: envelope.version,
                expected: ENVELOPE_VERSION,
            });
        }
        Ok(envelope)
    }
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventEnvelope {{ type: {}, correlation_id: {}, size: {} bytes }}",
            self.event_type,
            self.correlation_id,
            self.payload.len()
        )
    }
}
