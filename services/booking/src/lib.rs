//! # Booking Service
//!
//! Read side of the booking bounded context. Bookings committed by the write
//! side arrive as `BookingCreated` / `BookingCancelled` and are projected
//! into the `booking` collection, keyed by booking id.

pub mod events;
pub mod projection;

pub use events::{BookingCancelled, BookingCreated, BookingEventKind};
pub use projection::{BOOKING_COLLECTION, BookingReadModel, find_booking, registry};

use booking_pipeline_core::projection::ProjectionStore;
use booking_pipeline_projections::InboundConsumer;
use booking_pipeline_runtime::config::ConsumerConfig;
use booking_pipeline_runtime::tracker::CompletionTracker;
use std::sync::Arc;

/// Consumer name used in logs and dead-letter entries.
pub const CONSUMER_NAME: &str = "booking";

/// Inbound consumer applying booking events to `store`.
#[must_use]
pub fn booking_consumer<S: ProjectionStore>(
    store: Arc<S>,
    tracker: Arc<CompletionTracker>,
    config: &ConsumerConfig,
) -> InboundConsumer<S> {
    tracing::debug!(group = %config.group, "Creating booking consumer");
    InboundConsumer::new(CONSUMER_NAME, store, registry(), tracker)
        .with_max_redeliveries(config.max_redeliveries)
}
