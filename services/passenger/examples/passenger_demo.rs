//! Passenger pipeline demo.
//!
//! Runs the full publish → consume → project → register flow against the
//! in-memory broker and store:
//!
//! 1. Publish `UserCreated` for Sam
//! 2. Wait until it is published and consumed
//! 3. Complete Sam's registration from the read model
//! 4. Wait until the registration is projected and print the document
//!
//! Configure with `PIPELINE_*` environment variables (a `.env` file is
//! honored). Set `PIPELINE_METRICS_ADDR` to expose Prometheus metrics.
//!
//! ```text
//! cargo run -p booking-passenger --example passenger_demo
//! ```

use anyhow::{Context, Result, bail};
use booking_passenger::consumer::passenger_consumer;
use booking_passenger::{
    CompleteRegistration, PASSENGER_COLLECTION, PassengerReadModel, PassengerRegistrationCompleted,
    PassengerType, UserCreated, complete_registration,
};
use booking_pipeline_core::completion::CompletionStage;
use booking_pipeline_core::dead_letter::DeadLetterSink;
use booking_pipeline_core::event::IntegrationEvent;
use booking_pipeline_core::event_bus::EventBus;
use booking_pipeline_projections::ConsumerWorker;
use booking_pipeline_runtime::metrics::MetricsServer;
use booking_pipeline_runtime::retry::retry_until;
use booking_pipeline_runtime::{CompletionTracker, OutboundPublisher, PipelineConfig};
use booking_pipeline_testing::mocks::{
    InMemoryDeadLetterQueue, InMemoryEventBus, InMemoryProjectionStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.telemetry.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting passenger pipeline demo");

    let _metrics = match config.telemetry.metrics_addr {
        Some(addr) => {
            let mut server = MetricsServer::new(addr);
            server.start().context("failed to start metrics server")?;
            Some(server)
        }
        None => None,
    };

    let bus = Arc::new(InMemoryEventBus::new());
    let store = Arc::new(InMemoryProjectionStore::new());
    let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());
    let tracker = Arc::new(CompletionTracker::new());

    let publisher =
        OutboundPublisher::new(Arc::clone(&bus) as Arc<dyn EventBus>, Arc::clone(&tracker))
            .with_retry_policy(config.publisher.retry_policy());

    let consumer = passenger_consumer(Arc::clone(&store), Arc::clone(&tracker), &config.consumer)
        .with_dead_letters(Arc::clone(&dead_letters) as Arc<dyn DeadLetterSink>);
    let worker = ConsumerWorker::new(Arc::new(consumer), Arc::clone(&bus) as Arc<dyn EventBus>)
        .start()
        .await
        .context("failed to start passenger consumer")?;

    let sam = UserCreated {
        passport_number: "123456789".to_string(),
        name: "Sam".to_string(),
    };
    let receipt = publisher.publish_event(&sam).await?;
    tracing::info!(correlation_id = %receipt.correlation_id, "Published UserCreated");

    if !wait_for(&tracker, &config, UserCreated::EVENT_TYPE, CompletionStage::Consumed).await {
        bail!("UserCreated was not consumed in time");
    }

    let response = complete_registration(
        store.as_ref(),
        &publisher,
        CompleteRegistration {
            passport_number: sam.passport_number.clone(),
            passenger_type: PassengerType::Male,
            age: 30,
        },
    )
    .await?;
    tracing::info!(passenger = ?response.passenger, "Registration completed");

    if !wait_for(
        &tracker,
        &config,
        PassengerRegistrationCompleted::EVENT_TYPE,
        CompletionStage::Consumed,
    )
    .await
    {
        bail!("PassengerRegistrationCompleted was not consumed in time");
    }

    let document = store
        .document::<PassengerReadModel>(PASSENGER_COLLECTION, &sam.passport_number)
        .await?
        .context("passenger document missing")?;
    tracing::info!(
        passport_number = %document.id,
        name = %document.data.name,
        applied_events = document.applied_events,
        registered = document.data.is_registered(),
        "Passenger read model"
    );

    worker.shutdown().await;
    tracing::info!(dead_letters = dead_letters.len(), "Demo finished");
    Ok(())
}

async fn wait_for(
    tracker: &CompletionTracker,
    config: &PipelineConfig,
    event_type: &str,
    stage: CompletionStage,
) -> bool {
    let timeout: Duration = match stage {
        CompletionStage::Published => config.wait.publish_timeout(),
        CompletionStage::Consumed => config.wait.consume_timeout(),
    };
    retry_until(&config.wait.policy(), stage.as_str(), || async move {
        tracker.await_any(event_type, stage, timeout).await.is_some()
    })
    .await
    .is_success()
}
