//! Completing a passenger's registration.

use crate::events::{PassengerRegistrationCompleted, PassengerType};
use crate::projection::{PASSENGER_COLLECTION, PassengerReadModel};
use booking_pipeline_core::projection::{
    DocumentKey, ProjectionError, ProjectionStore, read_document,
};
use booking_pipeline_runtime::publisher::{OutboundPublisher, PublishError, PublishReceipt};
use serde::{Deserialize, Serialize};

/// Command completing the registration of an existing passenger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRegistration {
    /// Passport number of the passenger
    pub passport_number: String,
    /// Declared passenger type
    pub passenger_type: PassengerType,
    /// Age in years
    pub age: u32,
}

/// Passenger as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerDto {
    /// Passport number
    pub passport_number: String,
    /// Full name
    pub name: String,
    /// Declared passenger type
    pub passenger_type: PassengerType,
    /// Age in years
    pub age: u32,
}

/// Response to [`CompleteRegistration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResponse {
    /// The registered passenger
    pub passenger: PassengerDto,
    /// Publication of the resulting `PassengerRegistrationCompleted`
    pub receipt: PublishReceipt,
}

/// Errors completing a registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// The command is malformed
    #[error("Invalid registration: {0}")]
    Invalid(String),

    /// No passenger with this passport number has been projected yet
    #[error("Passenger with passport number '{0}' not found")]
    NotFound(String),

    /// Reading the passenger projection failed
    #[error("Failed to read passenger: {0}")]
    Projection(#[from] ProjectionError),

    /// Publishing the completion event failed
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Upper bound on a declared age.
const MAX_AGE: u32 = 150;

/// Complete the registration of the passenger created for `command.passport_number`.
///
/// The passenger is read from the projection store; this is eventually
/// consistent, so callers wait for `UserCreated` to be consumed first.
///
/// # Errors
///
/// - [`RegistrationError::Invalid`] for a blank passport number or implausible age
/// - [`RegistrationError::NotFound`] if the passenger has not been projected
/// - [`RegistrationError::Projection`] if the store fails
/// - [`RegistrationError::Publish`] if `PassengerRegistrationCompleted` cannot be delivered
#[tracing::instrument(
    skip(store, publisher, command),
    fields(passport_number = %command.passport_number)
)]
pub async fn complete_registration<S>(
    store: &S,
    publisher: &OutboundPublisher,
    command: CompleteRegistration,
) -> Result<RegistrationResponse, RegistrationError>
where
    S: ProjectionStore + ?Sized,
{
    if command.passport_number.trim().is_empty() {
        return Err(RegistrationError::Invalid("passport number must not be empty".to_string()));
    }
    if command.age > MAX_AGE {
        return Err(RegistrationError::Invalid(format!("age {} exceeds {MAX_AGE}", command.age)));
    }

    let key = DocumentKey::new(PASSENGER_COLLECTION, command.passport_number.clone());
    let Some(document) = read_document::<_, PassengerReadModel>(store, &key).await? else {
        tracing::warn!("Passenger not projected yet");
        return Err(RegistrationError::NotFound(command.passport_number));
    };

    let receipt = publisher
        .publish_event(&PassengerRegistrationCompleted {
            passport_number: command.passport_number.clone(),
            passenger_type: command.passenger_type,
            age: command.age,
        })
        .await?;

    tracing::info!(correlation_id = %receipt.correlation_id, "Passenger registration completed");

    Ok(RegistrationResponse {
        passenger: PassengerDto {
            passport_number: command.passport_number,
            name: document.data.name,
            passenger_type: command.passenger_type,
            age: command.age,
        },
        receipt,
    })
}
