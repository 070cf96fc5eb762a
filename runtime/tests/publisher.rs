//! Outbound publisher behavior against the in-memory broker.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)]

use booking_pipeline_core::completion::CompletionStage;
use booking_pipeline_core::environment::Clock;
use booking_pipeline_core::event::{CorrelationId, EventEnvelope, EventError, IntegrationEvent};
use booking_pipeline_core::event_bus::{EventBus, EventBusError};
use booking_pipeline_core::outbox::Outbox;
use booking_pipeline_runtime::publisher::{OutboundPublisher, PublishError};
use booking_pipeline_runtime::retry::RetryPolicy;
use booking_pipeline_runtime::tracker::CompletionTracker;
use booking_pipeline_testing::mocks::{InMemoryEventBus, InMemoryOutbox, OutboxState, test_clock};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserCreated {
    passport_number: String,
    name: String,
}

impl IntegrationEvent for UserCreated {
    const EVENT_TYPE: &'static str = "UserCreated";
}

fn sam() -> UserCreated {
    UserCreated {
        passport_number: "123456789".to_string(),
        name: "Sam".to_string(),
    }
}

fn publisher(bus: &Arc<InMemoryEventBus>) -> (OutboundPublisher, Arc<CompletionTracker>) {
    let tracker = Arc::new(CompletionTracker::new());
    let bus = Arc::clone(bus) as Arc<dyn EventBus>;
    let publisher = OutboundPublisher::new(bus, Arc::clone(&tracker))
        .with_retry_policy(
            RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .build(),
        )
        .with_clock(Arc::new(test_clock()));
    (publisher, tracker)
}

#[tokio::test]
async fn published_event_is_observable_as_completion() {
    let bus = Arc::new(InMemoryEventBus::new());
    let (publisher, tracker) = publisher(&bus);

    let receipt = publisher.publish_event(&sam()).await.unwrap();

    assert_eq!(receipt.event_type, "UserCreated");
    assert_eq!(receipt.attempts, 1);
    assert!(receipt.first_publication);
    assert!(
        tracker
            .await_stage(
                "UserCreated",
                receipt.correlation_id,
                CompletionStage::Published,
                Duration::ZERO,
            )
            .await
    );

    let published = bus.published_to("integration.UserCreated");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].produced_at(), test_clock().now());
}

#[tokio::test]
async fn republishing_same_correlation_id_keeps_one_record() {
    let bus = Arc::new(InMemoryEventBus::new());
    let (publisher, tracker) = publisher(&bus);
    let envelope = EventEnvelope::from_event(&sam(), CorrelationId::new(), Utc::now()).unwrap();

    let first = publisher.publish(envelope.clone()).await.unwrap();
    let second = publisher.publish(envelope).await.unwrap();

    assert!(first.first_publication);
    assert!(!second.first_publication);
    assert_eq!(tracker.count("UserCreated", CompletionStage::Published), 1);
    assert_eq!(bus.published().len(), 2);
}

#[tokio::test]
async fn transient_broker_failures_are_retried() {
    let bus = Arc::new(InMemoryEventBus::new());
    let (publisher, _) = publisher(&bus);
    bus.fail_next_publishes(2);

    let receipt = publisher.publish_event(&sam()).await.unwrap();

    assert_eq!(receipt.attempts, 3);
    assert_eq!(bus.published().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_surface_delivery_failure() {
    let bus = Arc::new(InMemoryEventBus::new());
    let (publisher, tracker) = publisher(&bus);
    bus.fail_next_publishes(10);
    let envelope = EventEnvelope::from_event(&sam(), CorrelationId::new(), Utc::now()).unwrap();

    let err = publisher.publish(envelope.clone()).await.unwrap_err();

    match err {
        PublishError::DeliveryFailure {
            event_type,
            correlation_id,
            attempts,
            source,
        } => {
            assert_eq!(event_type, "UserCreated");
            assert_eq!(correlation_id, envelope.correlation_id());
            assert_eq!(attempts, 3);
            assert!(matches!(source, EventBusError::TransportError(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(tracker.is_empty());
}

#[tokio::test]
async fn invalid_envelopes_never_reach_the_broker() {
    let bus = Arc::new(InMemoryEventBus::new());
    let (publisher, tracker) = publisher(&bus);

    let blank_type = EventEnvelope::new("", CorrelationId::new(), vec![], Utc::now());
    let nil_id = EventEnvelope::new(
        "UserCreated",
        CorrelationId::from_uuid(Uuid::nil()),
        vec![],
        Utc::now(),
    );

    assert_eq!(
        publisher.publish(blank_type).await,
        Err(PublishError::InvalidEnvelope(EventError::MissingEventType))
    );
    assert_eq!(
        publisher.publish(nil_id).await,
        Err(PublishError::InvalidEnvelope(EventError::MissingCorrelationId))
    );
    assert!(bus.published().is_empty());
    assert!(tracker.is_empty());
}

#[tokio::test]
async fn outbox_is_staged_then_marked_dispatched() {
    let bus = Arc::new(InMemoryEventBus::new());
    let outbox = Arc::new(InMemoryOutbox::new());
    let (publisher, _) = publisher(&bus);
    let publisher = publisher.with_outbox(Arc::clone(&outbox) as Arc<dyn Outbox>);

    let receipt = publisher.publish_event(&sam()).await.unwrap();

    assert_eq!(outbox.state_of(receipt.correlation_id), Some(OutboxState::Dispatched));
}

#[tokio::test]
async fn failed_delivery_stays_in_outbox() {
    let bus = Arc::new(InMemoryEventBus::new());
    let outbox = Arc::new(InMemoryOutbox::new());
    let (publisher, _) = publisher(&bus);
    let publisher = publisher.with_outbox(Arc::clone(&outbox) as Arc<dyn Outbox>);
    bus.fail_next_publishes(10);

    assert!(publisher.publish_event(&sam()).await.is_err());

    assert_eq!(outbox.undispatched().len(), 1);
}

#[tokio::test]
async fn outbox_failure_blocks_publication() {
    let bus = Arc::new(InMemoryEventBus::new());
    let outbox = Arc::new(InMemoryOutbox::new());
    outbox.set_failing(true);
    let (publisher, _) = publisher(&bus);
    let publisher = publisher.with_outbox(Arc::clone(&outbox) as Arc<dyn Outbox>);

    assert!(matches!(
        publisher.publish_event(&sam()).await,
        Err(PublishError::Outbox(_))
    ));
    assert!(bus.published().is_empty());
}
