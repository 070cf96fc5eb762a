//! Event bus abstraction for cross-service communication.
//!
//! This module provides the [`EventBus`] trait the outbound publisher writes to
//! and the consumer worker reads from. The bus is the only thing a producing
//! and a consuming service share.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Command Handler  │  (commits its own write store)
//! └────────┬─────────┘
//!          │ EventEnvelope
//!          ▼
//! ┌──────────────────┐
//! │Outbound Publisher│──► Completion(Published)
//! └────────┬─────────┘
//!          │ publish(topic, envelope)
//!          ▼
//! ┌──────────────────┐
//! │     Broker       │◄─── at-least-once, redelivery on Requeue
//! └────────┬─────────┘
//!          │ Delivery
//!          ▼
//! ┌──────────────────┐
//! │ Inbound Consumer │──► Completion(Consumed)
//! └────────┬─────────┘
//!          ▼
//!   Read Projection Store
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: Deliveries may repeat; consumers deduplicate
//! - **Explicit settlement**: Every delivery is settled with an [`Acknowledgement`]
//! - **No cross-topic ordering**: Ordering is only per subscription
//!
//! # Topic Naming Convention
//!
//! One topic per event type: `integration.{EventType}` (see [`topic_for`]).

use crate::event::EventEnvelope;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Prefix of every integration topic.
pub const TOPIC_PREFIX: &str = "integration.";

/// Topic an event type is published to.
///
/// # Examples
///
/// ```
/// use booking_pipeline_core::event_bus::topic_for;
///
/// assert_eq!(topic_for("UserCreated"), "integration.UserCreated");
/// ```
#[must_use]
pub fn topic_for(event_type: &str) -> String {
    format!("{TOPIC_PREFIX}{event_type}")
}

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// A delivery could not be settled (unknown or already settled tag)
    #[error("Settlement failed for delivery {delivery_tag}: {reason}")]
    SettlementFailed {
        /// Broker-assigned delivery tag
        delivery_tag: u64,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize an envelope
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// One broker round trip carrying an envelope to a consumer.
///
/// `delivery_count` starts at 1 and grows by one for every redelivery of the
/// same message to the same subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the envelope was published to
    pub topic: String,
    /// The delivered envelope
    pub envelope: EventEnvelope,
    /// How many times this message has been delivered to this subscription
    pub delivery_count: u32,
    /// Broker-assigned tag used to settle the delivery
    pub delivery_tag: u64,
}

/// How a consumer settles a delivery with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Processing finished (applied or duplicate); drop the message
    Ack,
    /// Transient failure; deliver the message again
    Requeue,
    /// Poison message; never deliver again
    Reject,
}

/// Stream of deliveries from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Boxed future returned by [`EventBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Trait for broker implementations.
///
/// # Delivery Guarantees
///
/// - `publish` returning `Ok` means the broker accepted the envelope
/// - Every subscription receives each envelope published to its topics at least once
/// - A delivery settled with [`Acknowledgement::Requeue`] is delivered again with
///   an incremented `delivery_count`
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so publishers and workers can hold an `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] or [`EventBusError::TransportError`]
    /// if the broker did not accept the envelope.
    fn publish<'a>(&'a self, topic: &'a str, envelope: &'a EventEnvelope) -> BusFuture<'a, ()>;

    /// Subscribe to one or more topics and receive a stream of deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe<'a>(&'a self, topics: &'a [&'a str]) -> BusFuture<'a, EventStream>;

    /// Settle a delivery previously received from [`EventBus::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SettlementFailed`] if the delivery is unknown
    /// or was already settled.
    fn settle<'a>(&'a self, delivery: &'a Delivery, ack: Acknowledgement) -> BusFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_prefixed_by_event_type() {
        assert_eq!(topic_for("BookingCreated"), "integration.BookingCreated");
        assert!(topic_for("UserCreated").starts_with(TOPIC_PREFIX));
    }

    #[test]
    fn errors_render_context() {
        let err = EventBusError::PublishFailed {
            topic: "integration.UserCreated".to_string(),
            reason: "broker unreachable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Publish failed for topic 'integration.UserCreated': broker unreachable"
        );
    }
}
