//! Inbound consumer: applies delivered envelopes to read-model documents.
//!
//! # Algorithm
//!
//! For each delivery:
//!
//! 1. Resolve the handler registered for the envelope's event type
//! 2. Decode the payload and lock the target document's business key
//! 3. Skip the envelope if its correlation id is among the document's
//!    recently applied ids (redelivery)
//! 4. Otherwise apply it, append its id to the document's history and persist it
//! 5. Record `Completion(Consumed)`
//!
//! Failures are classified, never propagated: the worker only needs to know
//! how to settle the delivery (see [`ConsumeOutcome::acknowledgement`]).

use crate::handler::HandlerRegistry;
use crate::locks::KeyedLocks;
use booking_pipeline_core::completion::{CompletionRecord, CompletionStage};
use booking_pipeline_core::dead_letter::DeadLetterSink;
use booking_pipeline_core::environment::{Clock, SystemClock};
use booking_pipeline_core::event::EventEnvelope;
use booking_pipeline_core::event_bus::Acknowledgement;
use booking_pipeline_core::projection::{ProjectionDocument, ProjectionError, ProjectionStore};
use booking_pipeline_runtime::metrics::PipelineMetrics;
use booking_pipeline_runtime::tracker::CompletionTracker;
use serde_json::Value;
use std::sync::Arc;

/// Default number of deliveries after which a retryable failure is poison.
pub const DEFAULT_MAX_REDELIVERIES: u32 = 5;

/// Result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The envelope changed the document and `Completion(Consumed)` was recorded
    Applied,
    /// The envelope had already been applied; nothing changed
    AlreadyApplied,
    /// A transient failure; the broker should deliver the envelope again
    RetryRequested {
        /// What went wrong
        reason: String,
    },
    /// The envelope can never be applied and was dead-lettered
    Poisoned {
        /// Why the envelope was rejected
        reason: String,
    },
}

impl ConsumeOutcome {
    /// How the worker settles the delivery with the broker.
    #[must_use]
    pub const fn acknowledgement(&self) -> Acknowledgement {
        match self {
            Self::Applied | Self::AlreadyApplied => Acknowledgement::Ack,
            Self::RetryRequested { .. } => Acknowledgement::Requeue,
            Self::Poisoned { .. } => Acknowledgement::Reject,
        }
    }
}

enum Applied {
    Changed,
    Duplicate,
}

/// Applies envelopes to documents in a [`ProjectionStore`].
pub struct InboundConsumer<S> {
    name: String,
    store: Arc<S>,
    registry: Arc<HandlerRegistry>,
    tracker: Arc<CompletionTracker>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
    max_redeliveries: u32,
}

impl<S: ProjectionStore> InboundConsumer<S> {
    /// Create a consumer named `name` (used in logs and dead-letter entries).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: Arc<S>,
        registry: HandlerRegistry,
        tracker: Arc<CompletionTracker>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            registry: Arc::new(registry),
            tracker,
            dead_letters: None,
            clock: Arc::new(SystemClock),
            locks: KeyedLocks::new(),
            max_redeliveries: DEFAULT_MAX_REDELIVERIES,
        }
    }

    /// Record poison messages in `sink`.
    #[must_use]
    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Stamp documents and completion records with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Treat a retryable failure as poison once a message has been delivered
    /// `max_redeliveries` times. Should mirror the broker's own limit.
    #[must_use]
    pub const fn with_max_redeliveries(mut self, max_redeliveries: u32) -> Self {
        self.max_redeliveries = max_redeliveries;
        self
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handlers this consumer dispatches to.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Store documents are written to.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Handle one delivery of `envelope`.
    ///
    /// `delivery_count` is 1 for the first delivery and grows with every
    /// redelivery of the same message.
    #[tracing::instrument(
        skip(self, envelope),
        fields(
            consumer = %self.name,
            event_type = %envelope.event_type(),
            correlation_id = %envelope.correlation_id(),
        )
    )]
    pub async fn on_message(
        &self,
        envelope: &EventEnvelope,
        delivery_count: u32,
    ) -> ConsumeOutcome {
        match self.apply(envelope).await {
            Ok(Applied::Changed) => {
                PipelineMetrics::record_consumed(envelope.event_type());
                tracing::info!(delivery_count, "Event applied to read model");
                ConsumeOutcome::Applied
            }
            Ok(Applied::Duplicate) => {
                PipelineMetrics::record_duplicate(envelope.event_type());
                tracing::info!(delivery_count, "Event already applied, skipping");
                ConsumeOutcome::AlreadyApplied
            }
            Err(e) if e.is_retryable() && delivery_count < self.max_redeliveries => {
                tracing::warn!(
                    delivery_count,
                    error = %e,
                    "Transient failure, requesting redelivery"
                );
                ConsumeOutcome::RetryRequested { reason: e.to_string() }
            }
            Err(e) => {
                let reason = if e.is_retryable() {
                    format!("{e} (gave up after {delivery_count} deliveries)")
                } else {
                    e.to_string()
                };
                self.poison(envelope, &reason, delivery_count).await;
                ConsumeOutcome::Poisoned { reason }
            }
        }
    }

    async fn apply(&self, envelope: &EventEnvelope) -> Result<Applied, ProjectionError> {
        envelope
            .validate()
            .map_err(|e| ProjectionError::Validation(e.to_string()))?;

        let handler = self
            .registry
            .get(envelope.event_type())
            .ok_or_else(|| ProjectionError::UnknownEventType(envelope.event_type().to_string()))?;

        let prepared = handler.prepare(envelope)?;
        let storage_key = prepared.key().storage_key();
        let _guard = self.locks.lock(&storage_key).await;

        let current = match self.store.get(&storage_key).await? {
            Some(bytes) => Some(ProjectionDocument::<Value>::from_bytes(&bytes)?),
            None => None,
        };

        let correlation_id = envelope.correlation_id();
        if current.as_ref().is_some_and(|doc| doc.is_applied(correlation_id)) {
            return Ok(Applied::Duplicate);
        }

        let applied_events = current.as_ref().map_or(0, |doc| doc.applied_events);
        let recent_event_ids = current
            .as_ref()
            .map_or_else(|| vec![correlation_id], |doc| doc.recent_after(correlation_id));
        let document = ProjectionDocument {
            id: prepared.key().id().to_string(),
            data: prepared.apply(current.map(|doc| doc.data))?,
            last_applied_event_id: correlation_id,
            recent_event_ids,
            applied_events: applied_events + 1,
            updated_at: self.clock.now(),
        };

        self.store.save(&storage_key, &document.to_bytes()?).await?;

        self.tracker.record(CompletionRecord::new(
            envelope.event_type(),
            correlation_id,
            CompletionStage::Consumed,
            self.clock.now(),
        ));
        Ok(Applied::Changed)
    }

    async fn poison(&self, envelope: &EventEnvelope, reason: &str, delivery_count: u32) {
        PipelineMetrics::record_poison(envelope.event_type());
        tracing::error!(delivery_count, reason, "Poison message rejected");

        if let Some(sink) = &self.dead_letters {
            match sink.add_entry(&self.name, envelope, reason, delivery_count).await {
                Ok(id) => tracing::info!(dead_letter_id = id, "Poison message dead-lettered"),
                Err(e) => tracing::error!(error = %e, "Failed to dead-letter poison message"),
            }
        }
    }
}

impl<S> std::fmt::Debug for InboundConsumer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundConsumer")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .field("max_redeliveries", &self.max_redeliveries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::handler::Project;
    use booking_pipeline_core::event::{CorrelationId, IntegrationEvent};
    use booking_pipeline_core::projection::{DocumentKey, Result, read_document};
    use booking_pipeline_testing::mocks::{InMemoryDeadLetterQueue, InMemoryProjectionStore};
    use chrono::Utc;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct LoyaltyPointsEarned {
        member: String,
        points: i64,
    }

    impl IntegrationEvent for LoyaltyPointsEarned {
        const EVENT_TYPE: &'static str = "LoyaltyPointsEarned";
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Balance {
        points: i64,
    }

    struct BalanceProjector;

    impl Project for BalanceProjector {
        type Event = LoyaltyPointsEarned;
        type Document = Balance;
        const COLLECTION: &'static str = "balance";

        fn key(&self, event: &LoyaltyPointsEarned) -> String {
            event.member.clone()
        }

        fn project(
            &self,
            event: &LoyaltyPointsEarned,
            current: Option<Balance>,
        ) -> Result<Balance> {
            if event.points < 0 {
                return Err(ProjectionError::Validation("points must not be negative".into()));
            }
            let mut balance = current.unwrap_or_default();
            balance.points += event.points;
            Ok(balance)
        }
    }

    fn envelope(points: i64) -> EventEnvelope {
        let event = LoyaltyPointsEarned {
            member: "sam".into(),
            points,
        };
        EventEnvelope::from_event(&event, CorrelationId::new(), Utc::now()).unwrap()
    }

    fn consumer(store: &Arc<InMemoryProjectionStore>) -> InboundConsumer<InMemoryProjectionStore> {
        InboundConsumer::new(
            "loyalty",
            Arc::clone(store),
            HandlerRegistry::new().with(BalanceProjector),
            Arc::new(CompletionTracker::new()),
        )
        .with_max_redeliveries(3)
    }

    async fn balance(store: &InMemoryProjectionStore) -> Option<ProjectionDocument<Balance>> {
        read_document(store, &DocumentKey::new("balance", "sam")).await.unwrap()
    }

    #[tokio::test]
    async fn applies_then_skips_redelivery() {
        let store = Arc::new(InMemoryProjectionStore::new());
        let consumer = consumer(&store);
        let envelope = envelope(10);

        assert_eq!(consumer.on_message(&envelope, 1).await, ConsumeOutcome::Applied);
        assert_eq!(consumer.on_message(&envelope, 2).await, ConsumeOutcome::AlreadyApplied);

        let doc = balance(&store).await.unwrap();
        assert_eq!(doc.data.points, 10);
        assert_eq!(doc.applied_events, 1);
        assert_eq!(doc.last_applied_event_id, envelope.correlation_id());
        assert_eq!(consumer.tracker.count("LoyaltyPointsEarned", CompletionStage::Consumed), 1);
    }

    #[tokio::test]
    async fn distinct_events_accumulate() {
        let store = Arc::new(InMemoryProjectionStore::new());
        let consumer = consumer(&store);

        consumer.on_message(&envelope(10), 1).await;
        consumer.on_message(&envelope(5), 1).await;

        let doc = balance(&store).await.unwrap();
        assert_eq!(doc.data.points, 15);
        assert_eq!(doc.applied_events, 2);
    }

    #[tokio::test]
    async fn earlier_event_redelivered_after_later_one_is_skipped() {
        let store = Arc::new(InMemoryProjectionStore::new());
        let consumer = consumer(&store);
        let first = envelope(10);
        let second = envelope(5);

        assert_eq!(consumer.on_message(&first, 1).await, ConsumeOutcome::Applied);
        assert_eq!(consumer.on_message(&second, 1).await, ConsumeOutcome::Applied);
        assert_eq!(consumer.on_message(&first, 2).await, ConsumeOutcome::AlreadyApplied);

        let doc = balance(&store).await.unwrap();
        assert_eq!(doc.data.points, 15);
        assert_eq!(doc.applied_events, 2);
        assert_eq!(doc.last_applied_event_id, second.correlation_id());
        assert_eq!(
            doc.recent_event_ids,
            vec![first.correlation_id(), second.correlation_id()]
        );
    }

    #[tokio::test]
    async fn unknown_event_type_is_poison() {
        let store = Arc::new(InMemoryProjectionStore::new());
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let consumer =
            consumer(&store).with_dead_letters(Arc::clone(&dlq) as Arc<dyn DeadLetterSink>);
        let stranger = EventEnvelope::new("CargoLoaded", CorrelationId::new(), vec![1], Utc::now());

        let outcome = consumer.on_message(&stranger, 1).await;

        assert_eq!(outcome.acknowledgement(), Acknowledgement::Reject);
        assert_eq!(dlq.len(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn validation_failure_is_dead_lettered_without_mutation() {
        let store = Arc::new(InMemoryProjectionStore::new());
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let consumer =
            consumer(&store).with_dead_letters(Arc::clone(&dlq) as Arc<dyn DeadLetterSink>);

        let outcome = consumer.on_message(&envelope(-1), 1).await;

        assert!(matches!(outcome, ConsumeOutcome::Poisoned { .. }));
        assert!(balance(&store).await.is_none());
        let entries = dlq.entries();
        assert_eq!(entries[0].consumer, "loyalty");
        assert!(entries[0].reason.contains("points must not be negative"));
    }

    #[tokio::test]
    async fn storage_failure_requests_redelivery_until_limit() {
        let store = Arc::new(InMemoryProjectionStore::new());
        let consumer = consumer(&store);
        let envelope = envelope(10);

        store.fail_next_saves(3);
        assert!(matches!(
            consumer.on_message(&envelope, 1).await,
            ConsumeOutcome::RetryRequested { .. }
        ));
        assert!(matches!(
            consumer.on_message(&envelope, 2).await,
            ConsumeOutcome::RetryRequested { .. }
        ));
        assert!(matches!(
            consumer.on_message(&envelope, 3).await,
            ConsumeOutcome::Poisoned { .. }
        ));
        assert!(!consumer.tracker.is_recorded(
            "LoyaltyPointsEarned",
            envelope.correlation_id(),
            CompletionStage::Consumed
        ));
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let store = Arc::new(InMemoryProjectionStore::new());
        let consumer = consumer(&store);
        let envelope = envelope(7);

        store.fail_next_saves(1);
        assert_eq!(
            consumer.on_message(&envelope, 1).await.acknowledgement(),
            Acknowledgement::Requeue
        );
        assert_eq!(consumer.on_message(&envelope, 2).await, ConsumeOutcome::Applied);
        assert_eq!(balance(&store).await.unwrap().data.points, 7);
    }

    #[tokio::test]
    async fn concurrent_duplicates_apply_once() {
        let store = Arc::new(InMemoryProjectionStore::new());
        let consumer = Arc::new(consumer(&store));
        let envelope = envelope(3);

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let consumer = Arc::clone(&consumer);
                let envelope = envelope.clone();
                tokio::spawn(async move { consumer.on_message(&envelope, i + 1).await })
            })
            .collect();

        let mut applied = 0;
        for task in tasks {
            if task.await.unwrap() == ConsumeOutcome::Applied {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(balance(&store).await.unwrap().data.points, 3);
    }
}
