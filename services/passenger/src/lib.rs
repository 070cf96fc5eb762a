//! # Passenger Service
//!
//! Read side of the passenger bounded context.
//!
//! ```text
//! Identity service ──UserCreated──► Broker ──► InboundConsumer ──► passenger:<passport>
//!                                                     ▲
//! complete_registration ──PassengerRegistrationCompleted┘
//! ```
//!
//! - [`projection`]: the passenger read model and its projectors
//! - [`registration`]: completing a registration against the read model
//! - [`consumer`]: wiring an [`InboundConsumer`] for this service

pub mod events;
pub mod projection;
pub mod registration;

pub use events::{PassengerEventKind, PassengerRegistrationCompleted, PassengerType, UserCreated};
pub use projection::{
    PASSENGER_COLLECTION, PassengerReadModel, RegistrationCompletedProjector, UserCreatedProjector,
};
pub use registration::{
    CompleteRegistration, PassengerDto, RegistrationError, RegistrationResponse,
    complete_registration,
};

use booking_pipeline_projections::InboundConsumer;

/// Consumer wiring for the passenger service.
pub mod consumer {
    use super::InboundConsumer;
    use crate::projection::registry;
    use booking_pipeline_core::projection::ProjectionStore;
    use booking_pipeline_runtime::config::ConsumerConfig;
    use booking_pipeline_runtime::tracker::CompletionTracker;
    use std::sync::Arc;

    /// Consumer name used in logs and dead-letter entries.
    pub const CONSUMER_NAME: &str = "passenger";

    /// Inbound consumer applying passenger events to `store`.
    #[must_use]
    pub fn passenger_consumer<S: ProjectionStore>(
        store: Arc<S>,
        tracker: Arc<CompletionTracker>,
        config: &ConsumerConfig,
    ) -> InboundConsumer<S> {
        InboundConsumer::new(CONSUMER_NAME, store, registry(), tracker)
            .with_max_redeliveries(config.max_redeliveries)
    }
}
