//! In-memory dead-letter queue and outbox.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use booking_pipeline_core::dead_letter::{
    DeadLetterError, DeadLetterSink, DeadLetterStatus, FailedMessage,
};
use booking_pipeline_core::environment::Clock;
use booking_pipeline_core::event::{CorrelationId, EventEnvelope};
use booking_pipeline_core::outbox::{Outbox, OutboxError, OutboxFuture};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::mocks::test_clock;

/// In-memory [`DeadLetterSink`].
#[derive(Clone)]
pub struct InMemoryDeadLetterQueue {
    entries: Arc<Mutex<BTreeMap<u64, FailedMessage>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDeadLetterQueue {
    /// Create an empty queue stamping entries with the fixed test clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            clock: Arc::new(test_clock()),
        }
    }

    /// All entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<FailedMessage> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    /// Entries still awaiting investigation.
    #[must_use]
    pub fn pending(&self) -> Vec<FailedMessage> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.status == DeadLetterStatus::Pending)
            .cloned()
            .collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl Default for InMemoryDeadLetterQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadLetterSink for InMemoryDeadLetterQueue {
    fn add_entry<'a>(
        &'a self,
        consumer: &'a str,
        envelope: &'a EventEnvelope,
        reason: &'a str,
        delivery_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DeadLetterError>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap();
            let id = entries.keys().next_back().map_or(1, |last| last + 1);
            entries.insert(
                id,
                FailedMessage {
                    id,
                    consumer: consumer.to_string(),
                    envelope: envelope.clone(),
                    reason: reason.to_string(),
                    delivery_count,
                    failed_at: self.clock.now(),
                    status: DeadLetterStatus::Pending,
                },
            );
            Ok(id)
        })
    }

    fn update_status(
        &self,
        id: u64,
        status: DeadLetterStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.get_mut(&id).ok_or(DeadLetterError::NotFound(id))?;
            entry.status = status;
            Ok(())
        })
    }
}

impl std::fmt::Debug for InMemoryDeadLetterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDeadLetterQueue")
            .field("entries", &self.len())
            .finish()
    }
}

/// State of an envelope in the [`InMemoryOutbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxState {
    /// Staged, broker has not acknowledged yet
    Staged,
    /// Broker acknowledged
    Dispatched,
}

/// In-memory [`Outbox`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryOutbox {
    entries: Arc<Mutex<Vec<(EventEnvelope, OutboxState)>>>,
    fail_staging: Arc<Mutex<bool>>,
}

impl InMemoryOutbox {
    /// Create an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `stage` call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.fail_staging.lock().unwrap() = failing;
    }

    /// State of the envelope with `correlation_id`, if staged.
    #[must_use]
    pub fn state_of(&self, correlation_id: CorrelationId) -> Option<OutboxState> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(e, _)| e.correlation_id() == correlation_id)
            .map(|(_, state)| *state)
    }

    /// Envelopes staged but never dispatched; what a relay would republish.
    #[must_use]
    pub fn undispatched(&self) -> Vec<EventEnvelope> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, state)| *state == OutboxState::Staged)
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Number of staged envelopes, dispatched or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether nothing was staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl Outbox for InMemoryOutbox {
    fn stage<'a>(&'a self, envelope: &'a EventEnvelope) -> OutboxFuture<'a> {
        Box::pin(async move {
            if *self.fail_staging.lock().unwrap() {
                return Err(OutboxError::Storage("injected staging failure".to_string()));
            }
            let mut entries = self.entries.lock().unwrap();
            if !entries
                .iter()
                .any(|(e, _)| e.correlation_id() == envelope.correlation_id())
            {
                entries.push((envelope.clone(), OutboxState::Staged));
            }
            Ok(())
        })
    }

    fn mark_dispatched(&self, correlation_id: CorrelationId) -> OutboxFuture<'_> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap();
            match entries.iter_mut().find(|(e, _)| e.correlation_id() == correlation_id) {
                Some((_, state)) => {
                    *state = OutboxState::Dispatched;
                    Ok(())
                }
                None => Err(OutboxError::Storage(format!(
                    "no staged envelope with correlation id {correlation_id}"
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn envelope() -> EventEnvelope {
        EventEnvelope::new("UserCreated", CorrelationId::new(), vec![], Utc::now())
    }

    #[tokio::test]
    async fn dead_letter_entries_get_sequential_ids() {
        let dlq = InMemoryDeadLetterQueue::new();
        let first = dlq.add_entry("passenger", &envelope(), "bad payload", 1).await.unwrap();
        let second = dlq.add_entry("passenger", &envelope(), "bad payload", 5).await.unwrap();

        assert_eq!((first, second), (1, 2));
        assert_eq!(dlq.entries()[1].delivery_count, 5);
    }

    #[tokio::test]
    async fn dead_letter_status_updates() {
        let dlq = InMemoryDeadLetterQueue::new();
        let id = dlq.add_entry("passenger", &envelope(), "bad payload", 1).await.unwrap();

        dlq.update_status(id, DeadLetterStatus::Discarded).await.unwrap();

        assert!(dlq.pending().is_empty());
        assert_eq!(
            dlq.update_status(99, DeadLetterStatus::Resolved).await,
            Err(DeadLetterError::NotFound(99))
        );
    }

    #[tokio::test]
    async fn outbox_tracks_dispatch() {
        let outbox = InMemoryOutbox::new();
        let sent = envelope();

        outbox.stage(&sent).await.unwrap();
        outbox.stage(&sent).await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.undispatched().len(), 1);

        outbox.mark_dispatched(sent.correlation_id()).await.unwrap();
        assert_eq!(outbox.state_of(sent.correlation_id()), Some(OutboxState::Dispatched));
        assert!(outbox.undispatched().is_empty());
    }
}
