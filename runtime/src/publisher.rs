//! Outbound publisher: hands committed integration events to the broker.
//!
//! A command handler commits its own write store first, then calls
//! [`OutboundPublisher::publish`]. The publisher validates the envelope, retries
//! transient broker failures with exponential backoff, and records
//! `Completion(Published)` once the broker has accepted the envelope.
//!
//! A failed publication is surfaced to the caller; the write that preceded it
//! is never rolled back. Plug in an [`Outbox`] to make publication survive
//! process restarts.

use crate::metrics::PipelineMetrics;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::tracker::CompletionTracker;
use booking_pipeline_core::completion::{CompletionRecord, CompletionStage};
use booking_pipeline_core::environment::{Clock, SystemClock};
use booking_pipeline_core::event::{CorrelationId, EventEnvelope, EventError, IntegrationEvent};
use booking_pipeline_core::event_bus::{EventBus, EventBusError, topic_for};
use booking_pipeline_core::outbox::{Outbox, OutboxError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors returned by [`OutboundPublisher`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The envelope violates an envelope invariant; the broker was not called
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(EventError),

    /// The event could not be encoded into an envelope
    #[error("Failed to encode event: {0}")]
    Encoding(EventError),

    /// The outbox refused to stage the envelope; the broker was not called
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// The broker did not accept the envelope within the retry budget
    #[error("Failed to publish {event_type} ({correlation_id}) in {attempts} attempts: {source}")]
    DeliveryFailure {
        /// Event type of the envelope
        event_type: String,
        /// Correlation id of the envelope
        correlation_id: CorrelationId,
        /// Broker attempts made
        attempts: usize,
        /// Error returned by the final attempt
        source: EventBusError,
    },
}

/// Proof of a successful publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Correlation id of the published envelope
    pub correlation_id: CorrelationId,
    /// Event type of the published envelope
    pub event_type: String,
    /// Broker attempts it took
    pub attempts: usize,
    /// `false` if this correlation id had already been published
    pub first_publication: bool,
}

/// Publishes integration events to an [`EventBus`].
///
/// Cheap to share: wrap it in an `Arc` and hand it to every command handler.
pub struct OutboundPublisher {
    bus: Arc<dyn EventBus>,
    tracker: Arc<CompletionTracker>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    outbox: Option<Arc<dyn Outbox>>,
}

impl OutboundPublisher {
    /// Create a publisher with the default retry policy and system clock.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, tracker: Arc<CompletionTracker>) -> Self {
        Self {
            bus,
            tracker,
            policy: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            outbox: None,
        }
    }

    /// Use `policy` for broker retries.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stamp envelopes built by [`OutboundPublisher::publish_event`] with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stage every envelope in `outbox` before dispatching it.
    #[must_use]
    pub fn with_outbox(mut self, outbox: Arc<dyn Outbox>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Completion tracker this publisher records into.
    #[must_use]
    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }

    /// Wrap a typed event in a fresh envelope and publish it.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Encoding`] if the event cannot be serialized,
    /// otherwise the errors of [`OutboundPublisher::publish`].
    pub async fn publish_event<E>(&self, event: &E) -> Result<PublishReceipt, PublishError>
    where
        E: IntegrationEvent + Serialize,
    {
        let envelope = EventEnvelope::from_event(event, CorrelationId::new(), self.clock.now())
            .map_err(PublishError::Encoding)?;
        self.publish(envelope).await
    }

    /// Publish an envelope to the topic of its event type.
    ///
    /// # Errors
    ///
    /// - [`PublishError::InvalidEnvelope`] if the event type is blank or the
    ///   correlation id is nil
    /// - [`PublishError::Outbox`] if staging in the outbox fails
    /// - [`PublishError::DeliveryFailure`] once broker retries are exhausted
    #[tracing::instrument(
        skip(self, envelope),
        fields(event_type = %envelope.event_type(), correlation_id = %envelope.correlation_id())
    )]
    pub async fn publish(&self, envelope: EventEnvelope) -> Result<PublishReceipt, PublishError> {
        if let Err(e) = envelope.validate() {
            tracing::warn!(error = %e, "Rejecting invalid envelope");
            PipelineMetrics::record_publish_failure(envelope.event_type());
            return Err(PublishError::InvalidEnvelope(e));
        }

        if let Some(outbox) = &self.outbox {
            outbox.stage(&envelope).await?;
        }

        let topic = topic_for(envelope.event_type());
        let started = Instant::now();
        let attempts = std::sync::atomic::AtomicUsize::new(0);

        let result = retry_with_backoff(&self.policy, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.bus.publish(&topic, &envelope)
        })
        .await;

        let attempts = attempts.into_inner();
        if let Err(e) = result {
            tracing::error!(attempts = e.attempts, error = %e.last_error, "Publication failed");
            PipelineMetrics::record_publish_failure(envelope.event_type());
            return Err(PublishError::DeliveryFailure {
                event_type: envelope.event_type().to_string(),
                correlation_id: envelope.correlation_id(),
                attempts: e.attempts,
                source: e.last_error,
            });
        }

        PipelineMetrics::record_publish(envelope.event_type(), started.elapsed());

        let first_publication = self.tracker.record(CompletionRecord::new(
            envelope.event_type(),
            envelope.correlation_id(),
            CompletionStage::Published,
            self.clock.now(),
        ));

        if let Some(outbox) = &self.outbox {
            if let Err(e) = outbox.mark_dispatched(envelope.correlation_id()).await {
                // The broker already has the envelope; a later sweep may republish it.
                tracing::warn!(error = %e, "Failed to mark outbox entry as dispatched");
            }
        }

        tracing::info!(%topic, attempts, first_publication, "Event published");

        Ok(PublishReceipt {
            correlation_id: envelope.correlation_id(),
            event_type: envelope.event_type().to_string(),
            attempts,
            first_publication,
        })
    }
}

impl std::fmt::Debug for OutboundPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundPublisher")
            .field("policy", &self.policy)
            .field("outbox", &self.outbox.is_some())
            .finish_non_exhaustive()
    }
}
