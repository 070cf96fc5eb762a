//! Integration events the passenger service consumes and emits.

use booking_pipeline_core::event::IntegrationEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A user account was created by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    /// Passport number; the passenger's business key
    pub passport_number: String,
    /// Full name
    pub name: String,
}

impl IntegrationEvent for UserCreated {
    const EVENT_TYPE: &'static str = "UserCreated";
}

/// Kind of passenger, as declared at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassengerType {
    /// Adult male
    Male,
    /// Adult female
    Female,
    /// Infant travelling on a guardian's seat
    Baby,
    /// Not declared
    Unknown,
}

impl fmt::Display for PassengerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Baby => "Baby",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// A passenger finished registration with their type and age.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerRegistrationCompleted {
    /// Passport number of the registered passenger
    pub passport_number: String,
    /// Declared passenger type
    pub passenger_type: PassengerType,
    /// Age in years
    pub age: u32,
}

impl IntegrationEvent for PassengerRegistrationCompleted {
    const EVENT_TYPE: &'static str = "PassengerRegistrationCompleted";
}

/// Event kinds the passenger service knows how to project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassengerEventKind {
    /// [`UserCreated`]
    UserCreated,
    /// [`PassengerRegistrationCompleted`]
    RegistrationCompleted,
}

impl PassengerEventKind {
    /// Every kind, in projection order.
    pub const ALL: [Self; 2] = [Self::UserCreated, Self::RegistrationCompleted];

    /// Wire event type of this kind.
    #[must_use]
    pub const fn event_type(self) -> &'static str {
        match self {
            Self::UserCreated => UserCreated::EVENT_TYPE,
            Self::RegistrationCompleted => PassengerRegistrationCompleted::EVENT_TYPE,
        }
    }

    /// Kind for a wire event type, if it is one of ours.
    #[must_use]
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.event_type() == event_type)
    }
}
