//! Booking read model.

use crate::events::{BookingCancelled, BookingCreated, BookingEventKind};
use booking_pipeline_core::projection::{
    DocumentKey, ProjectionDocument, ProjectionError, ProjectionStore, Result, read_document,
};
use booking_pipeline_projections::{HandlerRegistry, Project};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection holding booking documents.
pub const BOOKING_COLLECTION: &str = "booking";

/// Denormalized booking, one document per booking id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingReadModel {
    /// Booking id
    pub booking_id: String,
    /// Passenger name as booked
    pub passenger_name: String,
    /// Passport number of the booked passenger
    pub passport_number: String,
    /// Flight number
    pub flight_number: String,
    /// IATA code of the departure airport
    pub departure_airport: String,
    /// IATA code of the arrival airport
    pub arrive_airport: String,
    /// Scheduled departure
    pub flight_date: DateTime<Utc>,
    /// Reserved seat
    pub seat_number: String,
    /// Price in minor currency units
    pub price: u64,
    /// Free-form note
    pub description: String,
    /// Set once a [`BookingCancelled`] is applied
    pub is_cancelled: bool,
    /// Reason carried by the cancellation
    pub cancellation_reason: Option<String>,
}

/// Projects [`BookingCreated`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingCreatedProjector;

impl Project for BookingCreatedProjector {
    type Event = BookingCreated;
    type Document = BookingReadModel;
    const COLLECTION: &'static str = BOOKING_COLLECTION;

    fn key(&self, event: &BookingCreated) -> String {
        event.booking_id.clone()
    }

    fn project(
        &self,
        event: &BookingCreated,
        current: Option<BookingReadModel>,
    ) -> Result<BookingReadModel> {
        if event.booking_id.trim().is_empty() {
            return Err(ProjectionError::Validation("booking_id must not be empty".to_string()));
        }
        if event.seat_number.trim().is_empty() {
            return Err(ProjectionError::Validation(format!(
                "booking {} has no seat",
                event.booking_id
            )));
        }
        // Booking ids are never reused; a second, distinct creation is a producer bug.
        if current.is_some() {
            return Err(ProjectionError::Validation(format!(
                "booking {} already exists",
                event.booking_id
            )));
        }

        Ok(BookingReadModel {
            booking_id: event.booking_id.clone(),
            passenger_name: event.passenger_name.clone(),
            passport_number: event.passport_number.clone(),
            flight_number: event.flight_number.clone(),
            departure_airport: event.departure_airport.clone(),
            arrive_airport: event.arrive_airport.clone(),
            flight_date: event.flight_date,
            seat_number: event.seat_number.clone(),
            price: event.price,
            description: event.description.clone(),
            is_cancelled: false,
            cancellation_reason: None,
        })
    }
}

/// Projects [`BookingCancelled`] onto an existing booking.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingCancelledProjector;

impl Project for BookingCancelledProjector {
    type Event = BookingCancelled;
    type Document = BookingReadModel;
    const COLLECTION: &'static str = BOOKING_COLLECTION;

    fn key(&self, event: &BookingCancelled) -> String {
        event.booking_id.clone()
    }

    fn project(
        &self,
        event: &BookingCancelled,
        current: Option<BookingReadModel>,
    ) -> Result<BookingReadModel> {
        let booking = current.ok_or_else(|| {
            ProjectionError::NotReady(format!(
                "booking {} has not been created yet",
                event.booking_id
            ))
        })?;

        Ok(BookingReadModel {
            is_cancelled: true,
            cancellation_reason: Some(event.reason.clone()),
            ..booking
        })
    }
}

/// Registry with a projector for every [`BookingEventKind`].
#[must_use]
pub fn registry() -> HandlerRegistry {
    BookingEventKind::ALL
        .into_iter()
        .fold(HandlerRegistry::new(), |registry, kind| match kind {
            BookingEventKind::Created => registry.with(BookingCreatedProjector),
            BookingEventKind::Cancelled => registry.with(BookingCancelledProjector),
        })
}

/// Look a booking up in the read model.
///
/// # Errors
///
/// Returns the store's [`ProjectionError`].
pub async fn find_booking<S: ProjectionStore>(
    store: &S,
    booking_id: &str,
) -> Result<Option<ProjectionDocument<BookingReadModel>>> {
    read_document(store, &DocumentKey::new(BOOKING_COLLECTION, booking_id)).await
}
