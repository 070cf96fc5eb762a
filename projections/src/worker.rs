//! Consumer worker: drives an [`InboundConsumer`] from a broker subscription.
//!
//! # Lifecycle
//!
//! ```text
//! start() ──subscribe──► spawn loop ──► on_message ──► settle ──┐
//!                             ▲                                 │
//!                             └─────────── next delivery ◄──────┘
//!                             │
//!                    shutdown signal / stream end
//! ```
//!
//! The worker handles one delivery at a time and settles each one before
//! taking the next, so a requeued message never overtakes its own retry.
//!
//! # Example
//!
//! ```ignore
//! let worker = ConsumerWorker::new(Arc::new(consumer), bus);
//! let handle = worker.start().await?;
//!
//! // ... later
//! handle.shutdown().await;
//! ```

use crate::consumer::InboundConsumer;
use booking_pipeline_core::event_bus::{Delivery, EventBus, EventBusError, EventStream, topic_for};
use booking_pipeline_core::projection::ProjectionStore;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Errors that stop a worker from starting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The consumer has no handlers, so there is nothing to subscribe to
    #[error("Consumer '{0}' has no registered handlers")]
    NoHandlers(String),

    /// The broker refused the subscription
    #[error("Failed to subscribe: {0}")]
    Subscription(#[from] EventBusError),
}

/// Pulls deliveries for every event type the consumer handles.
pub struct ConsumerWorker<S> {
    consumer: Arc<InboundConsumer<S>>,
    bus: Arc<dyn EventBus>,
    topics: Vec<String>,
}

impl<S> ConsumerWorker<S>
where
    S: ProjectionStore + 'static,
{
    /// Create a worker subscribed to the topic of every registered event type.
    #[must_use]
    pub fn new(consumer: Arc<InboundConsumer<S>>, bus: Arc<dyn EventBus>) -> Self {
        let topics = consumer
            .registry()
            .event_types()
            .into_iter()
            .map(topic_for)
            .collect();
        Self { consumer, bus, topics }
    }

    /// Topics this worker subscribes to.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Subscribe and spawn the processing loop.
    ///
    /// The subscription is established before this returns, so envelopes
    /// published afterwards are guaranteed to reach the worker.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] if there is nothing to subscribe to or the
    /// broker refuses the subscription.
    pub async fn start(self) -> Result<WorkerHandle, WorkerError> {
        if self.topics.is_empty() {
            return Err(WorkerError::NoHandlers(self.consumer.name().to_string()));
        }

        let stream = {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
            self.bus.subscribe(&topics).await?
        };

        tracing::info!(
            consumer = %self.consumer.name(),
            topics = ?self.topics,
            "Consumer worker started"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(stream, shutdown_rx));

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join,
        })
    }

    async fn run(self, mut stream: EventStream, mut shutdown: watch::Receiver<bool>) {
        let name = self.consumer.name().to_string();

        while !*shutdown.borrow() {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(delivery)) => self.handle(delivery).await,
                    Some(Err(e)) => {
                        tracing::error!(
                            consumer = %name,
                            error = %e,
                            "Error receiving delivery from bus"
                        );
                    }
                    None => {
                        tracing::info!(consumer = %name, "Subscription closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    // A dropped handle closes the channel; that also stops the loop.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(consumer = %name, "Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!(consumer = %name, "Consumer worker stopped");
    }

    async fn handle(&self, delivery: Delivery) {
        let outcome = self
            .consumer
            .on_message(&delivery.envelope, delivery.delivery_count)
            .await;
        let ack = outcome.acknowledgement();

        if let Err(e) = self.bus.settle(&delivery, ack).await {
            tracing::error!(
                consumer = %self.consumer.name(),
                delivery_tag = delivery.delivery_tag,
                ?ack,
                error = %e,
                "Failed to settle delivery"
            );
        }
    }
}

/// Handle to a running [`ConsumerWorker`].
///
/// Dropping the handle stops the worker after the delivery in progress.
#[derive(Debug)]
#[must_use = "dropping the handle stops the worker"]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Whether the processing loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal shutdown and wait for the loop to exit.
    ///
    /// The delivery in progress, if any, is finished and settled first.
    pub async fn shutdown(self) {
        // The loop may already be gone (stream ended); that is fine.
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Consumer worker task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::handler::{HandlerRegistry, Project};
    use booking_pipeline_core::completion::CompletionStage;
    use booking_pipeline_core::event::{CorrelationId, EventEnvelope, IntegrationEvent};
    use booking_pipeline_core::projection::Result;
    use booking_pipeline_runtime::tracker::CompletionTracker;
    use booking_pipeline_testing::mocks::{InMemoryEventBus, InMemoryProjectionStore};
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct GateAssigned {
        flight: String,
        gate: String,
    }

    impl IntegrationEvent for GateAssigned {
        const EVENT_TYPE: &'static str = "GateAssigned";
    }

    struct GateProjector;

    impl Project for GateProjector {
        type Event = GateAssigned;
        type Document = String;
        const COLLECTION: &'static str = "gate";

        fn key(&self, event: &GateAssigned) -> String {
            event.flight.clone()
        }

        fn project(&self, event: &GateAssigned, _current: Option<String>) -> Result<String> {
            Ok(event.gate.clone())
        }
    }

    type Setup = (
        Arc<InMemoryEventBus>,
        Arc<CompletionTracker>,
        ConsumerWorker<InMemoryProjectionStore>,
    );

    fn setup() -> Setup {
        let bus = Arc::new(InMemoryEventBus::new());
        let tracker = Arc::new(CompletionTracker::new());
        let consumer = InboundConsumer::new(
            "gates",
            Arc::new(InMemoryProjectionStore::new()),
            HandlerRegistry::new().with(GateProjector),
            Arc::clone(&tracker),
        );
        let worker = ConsumerWorker::new(Arc::new(consumer), Arc::clone(&bus) as Arc<dyn EventBus>);
        (bus, tracker, worker)
    }

    #[tokio::test]
    async fn subscribes_to_registered_topics() {
        let (_, _, worker) = setup();
        assert_eq!(worker.topics(), ["integration.GateAssigned".to_string()]);
    }

    #[tokio::test]
    async fn consumes_and_acknowledges() {
        let (bus, tracker, worker) = setup();
        let handle = worker.start().await.unwrap();

        let event = GateAssigned {
            flight: "BA117".into(),
            gate: "B32".into(),
        };
        let envelope = EventEnvelope::from_event(&event, CorrelationId::new(), Utc::now()).unwrap();
        bus.publish(&topic_for("GateAssigned"), &envelope).await.unwrap();

        assert!(
            tracker
                .await_stage(
                    "GateAssigned",
                    envelope.correlation_id(),
                    CompletionStage::Consumed,
                    Duration::from_secs(5),
                )
                .await
        );

        handle.shutdown().await;
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_loop() {
        let (_, _, worker) = setup();
        let handle = worker.start().await.unwrap();
        assert!(!handle.is_finished());

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_handle_stops_loop() {
        let (bus, _, worker) = setup();
        let handle = worker.start().await.unwrap();
        drop(handle);

        let event = GateAssigned {
            flight: "BA117".into(),
            gate: "B32".into(),
        };
        let envelope = EventEnvelope::from_event(&event, CorrelationId::new(), Utc::now()).unwrap();

        // Once the loop exits its subscription stream is gone and the bus prunes it.
        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.subscription_count() > 0 {
                bus.publish(&topic_for("GateAssigned"), &envelope).await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn empty_registry_cannot_start() {
        let bus = Arc::new(InMemoryEventBus::new());
        let consumer = InboundConsumer::new(
            "idle",
            Arc::new(InMemoryProjectionStore::new()),
            HandlerRegistry::new(),
            Arc::new(CompletionTracker::new()),
        );
        let worker = ConsumerWorker::new(Arc::new(consumer), bus);

        assert_eq!(
            worker.start().await.err(),
            Some(WorkerError::NoHandlers("idle".to_string()))
        );
    }
}
