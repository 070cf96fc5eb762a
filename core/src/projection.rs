//! Read projections: denormalized documents derived from integration events.
//!
//! # Overview
//!
//! Projections are the **query side of CQRS**. A consuming service never reads
//! another service's write store; it builds its own read-optimized documents
//! from the integration events it receives.
//!
//! ## Key Concepts
//!
//! - **Projection Store**: Backend storage for projection documents
//! - **Projection Document**: One denormalized document per business key,
//!   stamped with the id of the last event applied to it
//! - **Idempotence guard**: An event whose correlation id is among the
//!   document's recently applied ids is a redelivery and is not applied.
//!   The window holds the last [`APPLIED_EVENT_HISTORY`] events per document
//!
//! ## CQRS Separation
//!
//! ```text
//! Write Side (Service A):          Read Side (Service B):
//! ┌─────────────────┐             ┌──────────────────────┐
//! │  Write Store    │             │  Projection Store    │
//! │  passengers     │             │  passenger:123456789 │
//! └─────────────────┘             └──────────────────────┘
//!         │                                  ▲
//!         │ integration events               │ applied by the
//!         ▼                                  │ inbound consumer
//! ┌───────────────────────────────────────────┐
//! │                 Broker                    │
//! └───────────────────────────────────────────┘
//! ```

use crate::event::CorrelationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::future::Future;

/// Error type for projection operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error (transient)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The event payload cannot be applied (non-retryable)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A document this event builds on has not been projected yet (transient)
    #[error("Projection not ready: {0}")]
    NotReady(String),

    /// No handler is registered for the event type
    #[error("No projection handler registered for event type '{0}'")]
    UnknownEventType(String),
}

impl ProjectionError {
    /// Whether redelivering the same event may succeed later.
    ///
    /// Storage failures and missing prerequisite documents are retryable.
    /// Everything else is a poison message.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::NotReady(_))
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Storage backend for projection data.
///
/// Keys are opaque strings; see [`DocumentKey`] for the convention used by the
/// inbound consumer. Values are serialized documents.
pub trait ProjectionStore: Send + Sync {
    /// Save projection data to storage (insert or replace).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if save fails.
    fn save(&self, key: &str, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Get projection data by key.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if retrieval fails.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Delete projection data by key.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if deletion fails.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if projection data exists.
    ///
    /// Default implementation uses [`ProjectionStore::get`].
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if check fails.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }
}

/// Address of a document: collection plus business key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    collection: String,
    id: String,
}

impl DocumentKey {
    /// Create a key for `id` in `collection`.
    #[must_use]
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Collection name (e.g. `"passenger"`).
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Business key inside the collection.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Storage key used with a [`ProjectionStore`].
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.collection, self.id)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection, self.id)
    }
}

/// Number of applied correlation ids each document remembers.
pub const APPLIED_EVENT_HISTORY: usize = 64;

/// A read-model document as persisted by the inbound consumer.
///
/// `data` holds the denormalized fields; the remaining fields are pipeline
/// bookkeeping. Documents are stored as JSON so read APIs can serve them
/// without knowing the event schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionDocument<D> {
    /// Business key
    pub id: String,
    /// Denormalized fields
    pub data: D,
    /// Correlation id of the last event applied to this document
    pub last_applied_event_id: CorrelationId,
    /// Correlation ids of recently applied events, oldest first
    #[serde(default)]
    pub recent_event_ids: Vec<CorrelationId>,
    /// Number of distinct events applied to this document
    pub applied_events: u64,
    /// When the last event was applied
    pub updated_at: DateTime<Utc>,
}

impl<D> ProjectionDocument<D> {
    /// Whether the event with `correlation_id` was applied to this document.
    ///
    /// Only the last [`APPLIED_EVENT_HISTORY`] events are remembered.
    #[must_use]
    pub fn is_applied(&self, correlation_id: CorrelationId) -> bool {
        self.last_applied_event_id == correlation_id
            || self.recent_event_ids.contains(&correlation_id)
    }

    /// Recent ids for the next revision once `correlation_id` is applied.
    #[must_use]
    pub fn recent_after(&self, correlation_id: CorrelationId) -> Vec<CorrelationId> {
        let skip = (self.recent_event_ids.len() + 1).saturating_sub(APPLIED_EVENT_HISTORY);
        self.recent_event_ids
            .iter()
            .skip(skip)
            .copied()
            .chain(std::iter::once(correlation_id))
            .collect()
    }
}

impl<D: Serialize> ProjectionDocument<D> {
    /// Encode the document for storage.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProjectionError::Serialization(e.to_string()))
    }
}

impl<D: DeserializeOwned> ProjectionDocument<D> {
    /// Decode a stored document.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] if the bytes are not a document of `D`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProjectionError::Serialization(e.to_string()))
    }
}

/// Load a typed document from a projection store.
///
/// This is the read-side query boundary: read APIs call it directly and get
/// eventually consistent data.
///
/// # Errors
///
/// Returns [`ProjectionError::Storage`] if the store fails, or
/// [`ProjectionError::Serialization`] if the stored document is not a `D`.
pub async fn read_document<S, D>(
    store: &S,
    key: &DocumentKey,
) -> Result<Option<ProjectionDocument<D>>>
where
    S: ProjectionStore + ?Sized,
    D: DeserializeOwned,
{
    match store.get(&key.storage_key()).await? {
        Some(bytes) => ProjectionDocument::from_bytes(&bytes).map(Some),
        None => Ok(None),
    }
}
