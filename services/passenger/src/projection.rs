//! Passenger read model and the projectors that maintain it.
//!
//! Documents live in the `passenger` collection keyed by passport number.
//! `UserCreated` creates the document; `PassengerRegistrationCompleted`
//! fills in type and age and requires the document to exist already.

use crate::events::{PassengerEventKind, PassengerRegistrationCompleted, PassengerType, UserCreated};
use booking_pipeline_core::projection::{ProjectionError, Result};
use booking_pipeline_projections::{HandlerRegistry, Project};
use serde::{Deserialize, Serialize};

/// Collection holding passenger documents.
pub const PASSENGER_COLLECTION: &str = "passenger";

/// Denormalized passenger as served by read APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerReadModel {
    /// Passport number
    pub passport_number: String,
    /// Full name
    pub name: String,
    /// Declared type, once registration completed
    pub passenger_type: Option<PassengerType>,
    /// Age, once registration completed
    pub age: Option<u32>,
}

impl PassengerReadModel {
    /// Whether registration has been completed.
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.passenger_type.is_some()
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ProjectionError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Projects [`UserCreated`] into a fresh passenger document.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserCreatedProjector;

impl Project for UserCreatedProjector {
    type Event = UserCreated;
    type Document = PassengerReadModel;
    const COLLECTION: &'static str = PASSENGER_COLLECTION;

    fn key(&self, event: &UserCreated) -> String {
        event.passport_number.clone()
    }

    fn project(
        &self,
        event: &UserCreated,
        current: Option<PassengerReadModel>,
    ) -> Result<PassengerReadModel> {
        require("passport_number", &event.passport_number)?;
        require("name", &event.name)?;

        // A user re-created under the same passport keeps any completed registration.
        let (passenger_type, age) =
            current.map_or((None, None), |doc| (doc.passenger_type, doc.age));
        Ok(PassengerReadModel {
            passport_number: event.passport_number.clone(),
            name: event.name.clone(),
            passenger_type,
            age,
        })
    }
}

/// Projects [`PassengerRegistrationCompleted`] onto an existing passenger.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistrationCompletedProjector;

impl Project for RegistrationCompletedProjector {
    type Event = PassengerRegistrationCompleted;
    type Document = PassengerReadModel;
    const COLLECTION: &'static str = PASSENGER_COLLECTION;

    fn key(&self, event: &PassengerRegistrationCompleted) -> String {
        event.passport_number.clone()
    }

    fn project(
        &self,
        event: &PassengerRegistrationCompleted,
        current: Option<PassengerReadModel>,
    ) -> Result<PassengerReadModel> {
        require("passport_number", &event.passport_number)?;

        let Some(passenger) = current else {
            return Err(ProjectionError::NotReady(format!(
                "passenger {} has not been created yet",
                event.passport_number
            )));
        };

        Ok(PassengerReadModel {
            passenger_type: Some(event.passenger_type),
            age: Some(event.age),
            ..passenger
        })
    }
}

/// Registry with a projector for every [`PassengerEventKind`].
#[must_use]
pub fn registry() -> HandlerRegistry {
    PassengerEventKind::ALL
        .into_iter()
        .fold(HandlerRegistry::new(), |registry, kind| match kind {
            PassengerEventKind::UserCreated => registry.with(UserCreatedProjector),
            PassengerEventKind::RegistrationCompleted => {
                registry.with(RegistrationCompletedProjector)
            }
        })
}
