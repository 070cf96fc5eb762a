//! Transactional outbox hook.
//!
//! The publisher does not make "commit write store + publish" atomic by
//! itself. A service that needs that guarantee provides an [`Outbox`]: the
//! publisher stages each envelope before talking to the broker and marks it
//! dispatched once the broker has acknowledged it. A relay can then republish
//! anything left staged after a crash.

use crate::event::{CorrelationId, EventEnvelope};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from outbox storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutboxError {
    /// Storage backend error
    #[error("Outbox storage error: {0}")]
    Storage(String),
}

/// Boxed future returned by [`Outbox`] methods.
pub type OutboxFuture<'a> = Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + 'a>>;

/// Durable staging area for envelopes awaiting broker acknowledgment.
pub trait Outbox: Send + Sync {
    /// Stage an envelope before it is sent to the broker.
    ///
    /// Staging the same correlation id twice must be a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if staging fails.
    fn stage<'a>(&'a self, envelope: &'a EventEnvelope) -> OutboxFuture<'a>;

    /// Mark a staged envelope as acknowledged by the broker.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the update fails.
    fn mark_dispatched(&self, correlation_id: CorrelationId) -> OutboxFuture<'_>;
}
