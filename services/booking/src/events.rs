//! Booking integration events.

use booking_pipeline_core::event::IntegrationEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A booking was committed by the booking write side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCreated {
    /// Booking id, the read model's business key
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
}

impl IntegrationEvent for BookingCreated {
    const EVENT_TYPE: &'static str = "BookingCreated";
}

/// A booking was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCancelled {
    /// Booking being cancelled
    pub booking_id: String,
    /// Why it was cancelled
    pub reason: String,
}

impl IntegrationEvent for BookingCancelled {
    const EVENT_TYPE: &'static str = "BookingCancelled";
}

/// Event kinds the booking service projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookingEventKind {
    /// [`BookingCreated`]
    Created,
    /// [`BookingCancelled`]
    Cancelled,
}

impl BookingEventKind {
    /// Every kind, in registration order.
    pub const ALL: [Self; 2] = [Self::Created, Self::Cancelled];

    /// Wire event type of this kind.
    #[must_use]
    pub const fn event_type(self) -> &'static str {
        match self {
            Self::Created => BookingCreated::EVENT_TYPE,
            Self::Cancelled => BookingCancelled::EVENT_TYPE,
        }
    }
}
