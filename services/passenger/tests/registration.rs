//! End-to-end passenger registration through the pipeline.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use booking_passenger::consumer::passenger_consumer;
use booking_passenger::{
    CompleteRegistration, PASSENGER_COLLECTION, PassengerReadModel, PassengerRegistrationCompleted,
    PassengerType, RegistrationError, UserCreated, complete_registration,
};
use booking_pipeline_core::completion::CompletionStage;
use booking_pipeline_core::event_bus::Acknowledgement;
use booking_pipeline_projections::{ConsumerWorker, WorkerHandle};
use booking_pipeline_runtime::PipelineConfig;
use booking_pipeline_testing::helpers::init_tracing;
use booking_pipeline_testing::{InMemoryEventBus, InMemoryProjectionStore, PipelineHarness};
use std::sync::Arc;
use std::time::Duration;

fn sam() -> UserCreated {
    UserCreated {
        passport_number: "123456789".to_string(),
        name: "Sam".to_string(),
    }
}

async fn start_passenger_service(
    harness: &PipelineHarness,
) -> (Arc<InMemoryProjectionStore>, WorkerHandle) {
    let store = Arc::new(InMemoryProjectionStore::new());
    let config = PipelineConfig::default();
    let consumer = passenger_consumer(Arc::clone(&store), harness.tracker(), &config.consumer);
    let worker = ConsumerWorker::new(Arc::new(consumer), harness.bus_handle())
        .start()
        .await
        .expect("worker starts");
    (store, worker)
}

/// Wait until `count` deliveries have been settled.
async fn settled(bus: &InMemoryEventBus, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while bus.settlements().len() < count || bus.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("deliveries settled in time");
}

#[tokio::test]
async fn should_complete_register_passenger_and_update_read_model() {
    init_tracing();
    let harness = PipelineHarness::new();
    let (store, worker) = start_passenger_service(&harness).await;

    harness.publish(&sam()).await.unwrap();

    assert!(harness.wait_for_published::<UserCreated>().await, "UserCreated should be published");
    assert!(harness.wait_for_consumed::<UserCreated>().await, "UserCreated should be consumed");

    let created = store
        .document::<PassengerReadModel>(PASSENGER_COLLECTION, "123456789")
        .await
        .unwrap()
        .expect("passenger projected");
    assert_eq!(created.data.name, "Sam");

    let response = complete_registration(
        store.as_ref(),
        harness.publisher(),
        CompleteRegistration {
            passport_number: "123456789".to_string(),
            passenger_type: PassengerType::Female,
            age: 42,
        },
    )
    .await
    .unwrap();

    assert_eq!(response.passenger.name, "Sam");
    assert_eq!(response.passenger.passport_number, "123456789");
    assert_eq!(response.passenger.passenger_type, PassengerType::Female);
    assert_eq!(response.passenger.age, 42);

    assert!(
        harness
            .wait_for_stage::<PassengerRegistrationCompleted>(
                response.receipt.correlation_id,
                CompletionStage::Consumed,
            )
            .await
    );
    let registered = store
        .document::<PassengerReadModel>(PASSENGER_COLLECTION, "123456789")
        .await
        .unwrap()
        .unwrap();
    assert!(registered.data.is_registered());
    assert_eq!(registered.data.age, Some(42));
    assert_eq!(registered.applied_events, 2);

    worker.shutdown().await;
}

#[tokio::test]
async fn registration_of_unknown_passenger_is_not_found() {
    let harness = PipelineHarness::new();
    let store = InMemoryProjectionStore::new();

    let err = complete_registration(
        &store,
        harness.publisher(),
        CompleteRegistration {
            passport_number: "987654321".to_string(),
            passenger_type: PassengerType::Male,
            age: 30,
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, RegistrationError::NotFound(p) if p == "987654321"));
    assert!(harness.bus().published().is_empty());
}

#[tokio::test]
async fn implausible_age_is_rejected() {
    let harness = PipelineHarness::new();
    let store = InMemoryProjectionStore::new();

    let err = complete_registration(
        &store,
        harness.publisher(),
        CompleteRegistration {
            passport_number: "123456789".to_string(),
            passenger_type: PassengerType::Male,
            age: 400,
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, RegistrationError::Invalid(_)));
}

#[tokio::test]
async fn duplicate_delivery_is_applied_once() {
    let harness = PipelineHarness::new();
    let (store, worker) = start_passenger_service(&harness).await;
    harness.bus().duplicate_next_deliveries(1);

    let receipt = harness.publish(&sam()).await.unwrap();
    settled(harness.bus(), 2).await;

    let document = store
        .document::<PassengerReadModel>(PASSENGER_COLLECTION, "123456789")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.applied_events, 1);
    assert_eq!(document.last_applied_event_id, receipt.correlation_id);
    assert_eq!(harness.tracker().count("UserCreated", CompletionStage::Consumed), 1);
    assert_eq!(store.save_count(), 1);
    assert!(
        harness
            .bus()
            .settlements()
            .iter()
            .all(|(_, ack)| *ack == Acknowledgement::Ack)
    );

    worker.shutdown().await;
}

#[tokio::test]
async fn broker_redelivery_after_consumption_changes_nothing() {
    let harness = PipelineHarness::new();
    let (store, worker) = start_passenger_service(&harness).await;

    let receipt = harness.publish(&sam()).await.unwrap();
    assert!(harness.wait_for_consumed::<UserCreated>().await);
    settled(harness.bus(), 1).await;

    assert!(harness.bus().redeliver(receipt.correlation_id));
    settled(harness.bus(), 2).await;

    assert_eq!(store.save_count(), 1);
    assert_eq!(harness.tracker().count("UserCreated", CompletionStage::Consumed), 1);

    worker.shutdown().await;
}

#[tokio::test]
async fn transient_store_failure_is_redelivered_then_applied() {
    let harness = PipelineHarness::new();
    let (store, worker) = start_passenger_service(&harness).await;
    store.fail_next_saves(1);

    harness.publish(&sam()).await.unwrap();

    assert!(harness.wait_for_consumed::<UserCreated>().await);
    settled(harness.bus(), 2).await;
    let acks: Vec<_> = harness.bus().settlements().into_iter().map(|(_, ack)| ack).collect();
    assert_eq!(acks, vec![Acknowledgement::Requeue, Acknowledgement::Ack]);

    worker.shutdown().await;
}

#[tokio::test]
async fn invalid_user_is_rejected_without_completion() {
    let harness = PipelineHarness::new();
    let (store, worker) = start_passenger_service(&harness).await;

    harness
        .publish(&UserCreated {
            passport_number: "123456789".to_string(),
            name: String::new(),
        })
        .await
        .unwrap();
    settled(harness.bus(), 1).await;

    assert_eq!(harness.bus().rejected().len(), 1);
    assert!(store.is_empty());
    assert_eq!(harness.tracker().count("UserCreated", CompletionStage::Consumed), 0);

    worker.shutdown().await;
}

#[tokio::test]
async fn registration_for_missing_passenger_gives_up_after_redelivery_bound() {
    let harness = PipelineHarness::new();
    let (store, worker) = start_passenger_service(&harness).await;
    let max_redeliveries = PipelineConfig::default().consumer.max_redeliveries;

    harness
        .publish(&PassengerRegistrationCompleted {
            passport_number: "123456789".to_string(),
            passenger_type: PassengerType::Baby,
            age: 1,
        })
        .await
        .unwrap();
    settled(harness.bus(), max_redeliveries as usize).await;

    let rejected = harness.bus().rejected();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].delivery_count, max_redeliveries);
    assert!(store.is_empty());

    worker.shutdown().await;
}
