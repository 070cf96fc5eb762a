//! Dead-letter sink for poison messages.
//!
//! A message that cannot be applied (validation failure, unknown event type,
//! or too many redeliveries) is recorded here instead of being retried
//! forever. Entries keep the full envelope so an operator can inspect and
//! republish it.

use crate::event::EventEnvelope;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from dead-letter storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterError {
    /// Storage backend error
    #[error("Dead letter storage error: {0}")]
    Storage(String),

    /// No entry with this id
    #[error("Dead letter entry {0} not found")]
    NotFound(u64),
}

/// Status of a poison message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Waiting for investigation
    Pending,
    /// Fixed and republished
    Resolved,
    /// Permanently dropped
    Discarded,
}

impl DeadLetterStatus {
    /// Lowercase status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }
}

/// An entry in the dead-letter sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMessage {
    /// Unique identifier for this entry
    pub id: u64,
    /// Consumer that gave up on the message
    pub consumer: String,
    /// The poison envelope
    pub envelope: EventEnvelope,
    /// Why the message was poisoned
    pub reason: String,
    /// Deliveries seen before giving up
    pub delivery_count: u32,
    /// When the message was dead-lettered
    pub failed_at: DateTime<Utc>,
    /// Current status
    pub status: DeadLetterStatus,
}

/// Storage for poison messages.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so consumers can hold an
/// `Arc<dyn DeadLetterSink>`.
pub trait DeadLetterSink: Send + Sync {
    /// Record a poison message and return the entry id.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the entry cannot be stored.
    fn add_entry<'a>(
        &'a self,
        consumer: &'a str,
        envelope: &'a EventEnvelope,
        reason: &'a str,
        delivery_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DeadLetterError>> + Send + 'a>>;

    /// Change the status of an entry.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::NotFound`] if no entry has this id.
    fn update_status(
        &self,
        id: u64,
        status: DeadLetterStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>>;
}
