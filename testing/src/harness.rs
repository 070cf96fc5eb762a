//! End-to-end pipeline harness.
//!
//! Wires an in-memory broker, a completion tracker and an outbound publisher
//! together so a test can publish an event and wait for each pipeline stage
//! the way an operator would: with bounded, logged retries.
//!
//! # Example
//!
//! ```ignore
//! let harness = PipelineHarness::new();
//! let worker = ConsumerWorker::new(consumer, harness.bus_handle()).start().await?;
//!
//! harness.publish(&user_created).await?;
//! assert!(harness.wait_for_published::<UserCreated>().await);
//! assert!(harness.wait_for_consumed::<UserCreated>().await);
//! ```

use crate::event_bus::InMemoryEventBus;
use booking_pipeline_core::completion::CompletionStage;
use booking_pipeline_core::event::{CorrelationId, IntegrationEvent};
use booking_pipeline_core::event_bus::EventBus;
use booking_pipeline_runtime::config::{PipelineConfig, WaitConfig};
use booking_pipeline_runtime::publisher::{OutboundPublisher, PublishError, PublishReceipt};
use booking_pipeline_runtime::retry::{RetryOutcome, RetryPolicy, retry_until};
use booking_pipeline_runtime::tracker::CompletionTracker;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// In-memory pipeline for integration tests.
pub struct PipelineHarness {
    bus: Arc<InMemoryEventBus>,
    tracker: Arc<CompletionTracker>,
    publisher: OutboundPublisher,
    wait: WaitConfig,
}

impl PipelineHarness {
    /// Harness with the default wait settings (5s publish, 10s consume,
    /// 3 attempts, 2s linear backoff).
    #[must_use]
    pub fn new() -> Self {
        Self::with_wait(PipelineConfig::default().wait)
    }

    /// Harness with custom wait settings.
    #[must_use]
    pub fn with_wait(wait: WaitConfig) -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        let tracker = Arc::new(CompletionTracker::new());
        let broker = Arc::clone(&bus) as Arc<dyn EventBus>;
        let publisher = OutboundPublisher::new(broker, Arc::clone(&tracker))
            .with_retry_policy(
                RetryPolicy::builder()
                    .max_retries(3)
                    .initial_delay(Duration::from_millis(1))
                    .build(),
            );
        Self {
            bus,
            tracker,
            publisher,
            wait,
        }
    }

    /// The in-memory broker, for fault injection and inspection.
    #[must_use]
    pub fn bus(&self) -> &Arc<InMemoryEventBus> {
        &self.bus
    }

    /// The broker as a trait object, for consumer workers.
    #[must_use]
    pub fn bus_handle(&self) -> Arc<dyn EventBus> {
        Arc::clone(&self.bus) as Arc<dyn EventBus>
    }

    /// The completion tracker shared by the publisher and consumers.
    #[must_use]
    pub fn tracker(&self) -> Arc<CompletionTracker> {
        Arc::clone(&self.tracker)
    }

    /// The outbound publisher.
    #[must_use]
    pub const fn publisher(&self) -> &OutboundPublisher {
        &self.publisher
    }

    /// Wait settings in use.
    #[must_use]
    pub const fn wait_config(&self) -> &WaitConfig {
        &self.wait
    }

    /// Publish a typed event with a fresh correlation id.
    ///
    /// # Errors
    ///
    /// Returns the publisher's [`PublishError`].
    pub async fn publish<E>(&self, event: &E) -> Result<PublishReceipt, PublishError>
    where
        E: IntegrationEvent + Serialize,
    {
        self.publisher.publish_event(event).await
    }

    /// Wait until any `E` has been published.
    pub async fn wait_for_published<E: IntegrationEvent>(&self) -> bool {
        self.wait_for_any(
            E::EVENT_TYPE,
            CompletionStage::Published,
            self.wait.publish_timeout(),
            "publishing",
        )
        .await
    }

    /// Wait until any `E` has been consumed.
    pub async fn wait_for_consumed<E: IntegrationEvent>(&self) -> bool {
        self.wait_for_any(
            E::EVENT_TYPE,
            CompletionStage::Consumed,
            self.wait.consume_timeout(),
            "consuming",
        )
        .await
    }

    /// Wait until the `E` with `correlation_id` has reached `stage`.
    pub async fn wait_for_stage<E: IntegrationEvent>(
        &self,
        correlation_id: CorrelationId,
        stage: CompletionStage,
    ) -> bool {
        let timeout = match stage {
            CompletionStage::Published => self.wait.publish_timeout(),
            CompletionStage::Consumed => self.wait.consume_timeout(),
        };
        let tracker = &self.tracker;
        self.wait_with_retry(stage.as_str(), || async move {
            tracker.await_stage(E::EVENT_TYPE, correlation_id, stage, timeout).await
        })
        .await
        .is_success()
    }

    /// Re-evaluate `condition` with the harness's linear backoff policy.
    pub async fn wait_with_retry<F, Fut>(&self, operation: &str, condition: F) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        retry_until(&self.wait.policy(), operation, condition).await
    }

    async fn wait_for_any(
        &self,
        event_type: &str,
        stage: CompletionStage,
        timeout: Duration,
        operation: &str,
    ) -> bool {
        let tracker = &self.tracker;
        self.wait_with_retry(operation, || async move {
            tracker.await_any(event_type, stage, timeout).await.is_some()
        })
        .await
        .is_success()
    }

    /// Forget every completion, between scenarios sharing one harness.
    pub fn reset(&self) {
        self.tracker.clear();
    }
}

impl Default for PipelineHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHarness")
            .field("bus", &self.bus)
            .field("tracker", &self.tracker)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}
