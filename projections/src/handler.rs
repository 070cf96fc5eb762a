//! Projection handlers and the registry that routes envelopes to them.
//!
//! A service implements [`Project`] once per event type it consumes. The
//! [`HandlerRegistry`] maps each event type to its handler by explicit lookup,
//! so an envelope whose type nobody registered is detected immediately instead
//! of being decoded as the wrong thing.
//!
//! # Example
//!
//! ```ignore
//! struct PassengerProjector;
//!
//! impl Project for PassengerProjector {
//!     type Event = UserCreated;
//!     type Document = PassengerReadModel;
//!     const COLLECTION: &'static str = "passenger";
//!
//!     fn key(&self, event: &UserCreated) -> String {
//!         event.passport_number.clone()
//!     }
//!
//!     fn project(
//!         &self,
//!         event: &UserCreated,
//!         current: Option<PassengerReadModel>,
//!     ) -> Result<PassengerReadModel> {
//!         Ok(PassengerReadModel { name: event.name.clone(), ..current.unwrap_or_default() })
//!     }
//! }
//!
//! let registry = HandlerRegistry::new().with(PassengerProjector);
//! ```

use booking_pipeline_core::event::{EventEnvelope, EventError, IntegrationEvent};
use booking_pipeline_core::projection::{DocumentKey, ProjectionError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Typed projection of one integration event type into one collection.
pub trait Project: Send + Sync + 'static {
    /// Event consumed by this projector
    type Event: IntegrationEvent + DeserializeOwned;

    /// Read-model document produced by this projector
    type Document: Serialize + DeserializeOwned + Send;

    /// Collection the documents live in
    const COLLECTION: &'static str;

    /// Business key of the document an event targets.
    fn key(&self, event: &Self::Event) -> String;

    /// Apply an event to the current document (if any).
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::Validation`] if the event can never be applied
    /// - [`ProjectionError::NotReady`] if a prerequisite document is missing
    fn project(
        &self,
        event: &Self::Event,
        current: Option<Self::Document>,
    ) -> Result<Self::Document>;
}

type ApplyFn = Box<dyn FnOnce(Option<Value>) -> Result<Value> + Send>;

/// A decoded envelope ready to be applied to its document.
pub struct PreparedProjection {
    key: DocumentKey,
    apply: ApplyFn,
}

impl PreparedProjection {
    /// Create a prepared projection.
    #[must_use]
    pub fn new(key: DocumentKey, apply: ApplyFn) -> Self {
        Self { key, apply }
    }

    /// Document the envelope targets.
    #[must_use]
    pub const fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Compute the new document data from the current data.
    ///
    /// # Errors
    ///
    /// Propagates the projector's error.
    pub fn apply(self, current: Option<Value>) -> Result<Value> {
        (self.apply)(current)
    }
}

impl fmt::Debug for PreparedProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedProjection")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Type-erased handler stored in the [`HandlerRegistry`].
pub trait ProjectionHandler: Send + Sync {
    /// Event type this handler consumes.
    fn event_type(&self) -> &'static str;

    /// Decode an envelope and resolve the document it targets.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Validation`] if the payload is not a valid
    /// event of this handler's type.
    fn prepare(&self, envelope: &EventEnvelope) -> Result<PreparedProjection>;
}

/// Adapter turning a [`Project`] implementation into a [`ProjectionHandler`].
pub struct TypedHandler<P> {
    projector: Arc<P>,
}

impl<P: Project> TypedHandler<P> {
    /// Wrap a projector.
    #[must_use]
    pub fn new(projector: P) -> Self {
        Self {
            projector: Arc::new(projector),
        }
    }
}

impl<P: Project> ProjectionHandler for TypedHandler<P> {
    fn event_type(&self) -> &'static str {
        P::Event::EVENT_TYPE
    }

    fn prepare(&self, envelope: &EventEnvelope) -> Result<PreparedProjection> {
        let event: P::Event = envelope.decode().map_err(|e| match e {
            EventError::TypeMismatch { .. } => {
                ProjectionError::UnknownEventType(envelope.event_type().to_string())
            }
            other => ProjectionError::Validation(other.to_string()),
        })?;

        let key = DocumentKey::new(P::COLLECTION, self.projector.key(&event));
        let projector = Arc::clone(&self.projector);

        Ok(PreparedProjection::new(
            key,
            Box::new(move |current| {
                let current = current
                    .map(serde_json::from_value::<P::Document>)
                    .transpose()
                    .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
                let document = projector.project(&event, current)?;
                serde_json::to_value(document)
                    .map_err(|e| ProjectionError::Serialization(e.to_string()))
            }),
        ))
    }
}

/// Explicit event type → handler lookup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn ProjectionHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed projector, consuming and returning the registry.
    #[must_use]
    pub fn with<P: Project>(mut self, projector: P) -> Self {
        self.register(projector);
        self
    }

    /// Register a typed projector.
    ///
    /// A later registration for the same event type replaces the earlier one.
    pub fn register<P: Project>(&mut self, projector: P) {
        self.register_handler(Arc::new(TypedHandler::new(projector)));
    }

    /// Register a type-erased handler.
    pub fn register_handler(&mut self, handler: Arc<dyn ProjectionHandler>) {
        let event_type = handler.event_type();
        if self.handlers.insert(event_type, handler).is_some() {
            tracing::warn!(event_type, "Replacing projection handler");
        }
    }

    /// Handler for `event_type`, if one is registered.
    #[must_use]
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn ProjectionHandler>> {
        self.handlers.get(event_type).cloned()
    }

    /// Registered event types, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}
