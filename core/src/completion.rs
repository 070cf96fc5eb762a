//! Completion records: the two externally observable milestones of an event.
//!
//! Every integration event passes two edges on its way through the pipeline:
//! it is **published** (the broker accepted it) and it is **consumed** (a
//! remote projection applied it). Each edge produces at most one
//! [`CompletionRecord`], keyed by `(event_type, correlation_id, stage)`.

use crate::event::CorrelationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline milestone of an integration event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompletionStage {
    /// The broker acknowledged the envelope
    Published,
    /// A consumer applied the envelope to its read model
    Consumed,
}

impl CompletionStage {
    /// Lowercase name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Consumed => "consumed",
        }
    }
}

impl fmt::Display for CompletionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a completion: which event reached which stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletionKey {
    /// Event type of the envelope
    pub event_type: String,
    /// Correlation id of the envelope
    pub correlation_id: CorrelationId,
    /// Milestone reached
    pub stage: CompletionStage,
}

impl CompletionKey {
    /// Create a completion key.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        correlation_id: CorrelationId,
        stage: CompletionStage,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            correlation_id,
            stage,
        }
    }
}

impl fmt::Display for CompletionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.event_type, self.correlation_id, self.stage)
    }
}

/// Proof that an event reached a stage, with the time it was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Event type of the envelope
    pub event_type: String,
    /// Correlation id of the envelope
    pub correlation_id: CorrelationId,
    /// Milestone reached
    pub stage: CompletionStage,
    /// When the milestone was observed
    pub observed_at: DateTime<Utc>,
}

impl CompletionRecord {
    /// Create a record observed at `observed_at`.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        correlation_id: CorrelationId,
        stage: CompletionStage,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            correlation_id,
            stage,
            observed_at,
        }
    }

    /// Key this record is stored under.
    #[must_use]
    pub fn key(&self) -> CompletionKey {
        CompletionKey::new(self.event_type.clone(), self.correlation_id, self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key_matches_fields() {
        let id = CorrelationId::new();
        let record =
            CompletionRecord::new("UserCreated", id, CompletionStage::Consumed, Utc::now());
        assert_eq!(
            record.key(),
            CompletionKey::new("UserCreated", id, CompletionStage::Consumed)
        );
    }

    #[test]
    fn stage_names() {
        assert_eq!(CompletionStage::Published.to_string(), "published");
        assert_eq!(CompletionStage::Consumed.as_str(), "consumed");
    }
}
