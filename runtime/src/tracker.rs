//! Completion tracking for published and consumed integration events.
//!
//! The [`CompletionTracker`] is the single place callers ask "has this event
//! been published yet?" or "has it been applied to the read model yet?". The
//! publisher and the consumer record completions; tests and operators wait on
//! them. Nobody polls the broker.
//!
//! # Architecture
//!
//! ```text
//! Publisher ──record(Published)──┐
//!                                ▼
//!                     ┌─────────────────────┐
//!                     │  CompletionTracker  │  records: key → CompletionRecord
//!                     │                     │  waiters: key → oneshot senders
//!                     └─────────────────────┘
//!                                ▲      │ notify
//! Consumer ──record(Consumed)────┘      ▼
//!                                await_stage(.., timeout) → bool
//! ```
//!
//! # Usage
//!
//! ```rust
//! use booking_pipeline_core::completion::CompletionStage;
//! use booking_pipeline_core::event::CorrelationId;
//! use booking_pipeline_runtime::tracker::CompletionTracker;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let tracker = CompletionTracker::new();
//! let id = CorrelationId::new();
//!
//! tracker.record_now("UserCreated", id, CompletionStage::Published);
//!
//! let published = tracker
//!     .await_stage("UserCreated", id, CompletionStage::Published, Duration::from_secs(1))
//!     .await;
//! assert!(published);
//! # }
//! ```
//!
//! # Lifecycle
//!
//! A tracker is an ordinary value: create one per process (or per test), share
//! it behind an `Arc`, and call [`CompletionTracker::clear`] between test runs.

use booking_pipeline_core::completion::{CompletionKey, CompletionRecord, CompletionStage};
use booking_pipeline_core::environment::{Clock, SystemClock};
use booking_pipeline_core::event::CorrelationId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::metrics::PipelineMetrics;

/// What a waiter is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WaitKey {
    /// One specific event reaching a stage
    Exact(CompletionKey),
    /// Any event of a type reaching a stage
    AnyOf {
        event_type: String,
        stage: CompletionStage,
    },
}

#[derive(Default)]
struct TrackerState {
    records: HashMap<CompletionKey, CompletionRecord>,
    waiters: HashMap<WaitKey, Vec<oneshot::Sender<CompletionRecord>>>,
}

/// Process-wide record of which events reached which pipeline stage.
pub struct CompletionTracker {
    state: Mutex<TrackerState>,
    clock: Arc<dyn Clock>,
}

impl CompletionTracker {
    /// Create an empty tracker using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty tracker stamping records with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that an event reached a stage, observed now.
    ///
    /// Returns `true` if this is the first record for the key.
    pub fn record_now(
        &self,
        event_type: &str,
        correlation_id: CorrelationId,
        stage: CompletionStage,
    ) -> bool {
        self.record(CompletionRecord::new(
            event_type,
            correlation_id,
            stage,
            self.clock.now(),
        ))
    }

    /// Record a completion.
    ///
    /// Recording the same `(event_type, correlation_id, stage)` twice keeps the
    /// first record and returns `false`. A new record wakes every waiter
    /// interested in it.
    pub fn record(&self, record: CompletionRecord) -> bool {
        let key = record.key();
        let mut state = self.lock();

        if state.records.contains_key(&key) {
            tracing::debug!(
                event_type = %record.event_type,
                correlation_id = %record.correlation_id,
                stage = %record.stage,
                "Completion already recorded"
            );
            return false;
        }

        let exact = WaitKey::Exact(key.clone());
        let any = WaitKey::AnyOf {
            event_type: record.event_type.clone(),
            stage: record.stage,
        };
        for wait_key in [exact, any] {
            if let Some(senders) = state.waiters.remove(&wait_key) {
                for sender in senders {
                    // A dropped receiver means the waiter already timed out.
                    let _ = sender.send(record.clone());
                }
            }
        }

        tracing::debug!(
            event_type = %record.event_type,
            correlation_id = %record.correlation_id,
            stage = %record.stage,
            "Completion recorded"
        );
        PipelineMetrics::record_completion(&record.event_type, record.stage);
        state.records.insert(key, record);
        true
    }

    /// Look up a completion without waiting.
    #[must_use]
    pub fn get(
        &self,
        event_type: &str,
        correlation_id: CorrelationId,
        stage: CompletionStage,
    ) -> Option<CompletionRecord> {
        let key = CompletionKey::new(event_type, correlation_id, stage);
        self.lock().records.get(&key).cloned()
    }

    /// Whether an event has reached a stage.
    #[must_use]
    pub fn is_recorded(
        &self,
        event_type: &str,
        correlation_id: CorrelationId,
        stage: CompletionStage,
    ) -> bool {
        self.get(event_type, correlation_id, stage).is_some()
    }

    /// Wait until an event reaches a stage.
    ///
    /// Returns `true` immediately if the completion is already recorded,
    /// otherwise suspends the calling task until it is recorded (`true`) or
    /// `timeout` elapses (`false`). Timing out is an expected outcome, not an
    /// error.
    pub async fn await_stage(
        &self,
        event_type: &str,
        correlation_id: CorrelationId,
        stage: CompletionStage,
        timeout: Duration,
    ) -> bool {
        let key = CompletionKey::new(event_type, correlation_id, stage);
        let receiver = {
            let mut state = self.lock();
            if state.records.contains_key(&key) {
                return true;
            }
            Self::register(&mut state, WaitKey::Exact(key.clone()))
        };
        self.wait(WaitKey::Exact(key), receiver, timeout).await.is_some()
    }

    /// Wait until any event of `event_type` reaches a stage.
    ///
    /// Returns the earliest matching record if one already exists, otherwise
    /// the first one recorded before `timeout`, or `None`.
    pub async fn await_any(
        &self,
        event_type: &str,
        stage: CompletionStage,
        timeout: Duration,
    ) -> Option<CompletionRecord> {
        let wait_key = WaitKey::AnyOf {
            event_type: event_type.to_string(),
            stage,
        };
        let receiver = {
            let mut state = self.lock();
            let existing = state
                .records
                .values()
                .filter(|r| r.event_type == event_type && r.stage == stage)
                .min_by_key(|r| r.observed_at)
                .cloned();
            if existing.is_some() {
                return existing;
            }
            Self::register(&mut state, wait_key.clone())
        };
        self.wait(wait_key, receiver, timeout).await
    }

    fn register(state: &mut TrackerState, key: WaitKey) -> oneshot::Receiver<CompletionRecord> {
        let (sender, receiver) = oneshot::channel();
        let senders = state.waiters.entry(key).or_default();
        // Waiters whose future was dropped mid-wait leave closed senders behind.
        senders.retain(|s| !s.is_closed());
        senders.push(sender);
        receiver
    }

    async fn wait(
        &self,
        key: WaitKey,
        receiver: oneshot::Receiver<CompletionRecord>,
        timeout: Duration,
    ) -> Option<CompletionRecord> {
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(record)) => Some(record),
            // Sender dropped: the tracker was cleared while we waited.
            Ok(Err(_)) => None,
            Err(_) => {
                self.prune(&key);
                None
            }
        }
    }

    /// Drop closed senders registered under `key`, and the key once empty.
    fn prune(&self, key: &WaitKey) {
        let mut state = self.lock();
        if let Some(senders) = state.waiters.get_mut(key) {
            senders.retain(|s| !s.is_closed());
            if senders.is_empty() {
                state.waiters.remove(key);
            }
        }
    }

    /// Snapshot of every record, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<CompletionRecord> {
        let mut records: Vec<_> = self.lock().records.values().cloned().collect();
        records.sort_by_key(|r| r.observed_at);
        records
    }

    /// Number of records for `event_type` at `stage`.
    #[must_use]
    pub fn count(&self, event_type: &str, stage: CompletionStage) -> usize {
        self.lock()
            .records
            .keys()
            .filter(|k| k.event_type == event_type && k.stage == stage)
            .count()
    }

    /// Total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Number of waiters still registered (including ones that timed out but
    /// were not yet pruned).
    #[must_use]
    pub fn pending_waiters(&self) -> usize {
        let mut state = self.lock();
        state.waiters.retain(|_, senders| {
            senders.retain(|s| !s.is_closed());
            !senders.is_empty()
        });
        state.waiters.values().map(Vec::len).sum()
    }

    /// Forget every record and release every waiter.
    ///
    /// Call between test runs. Waiters blocked in `await_stage` return `false`.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.records.clear();
        state.waiters.clear();
    }
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("CompletionTracker")
            .field("records", &state.records.len())
            .field("waiters", &state.waiters.len())
            .finish_non_exhaustive()
    }
}
