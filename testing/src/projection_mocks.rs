//! In-memory projection testing utilities
//!
//! Provides fast, deterministic storage for read-model tests:
//! - [`InMemoryProjectionStore`]: HashMap-based projection storage with
//!   injectable save failures

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use booking_pipeline_core::projection::{
    DocumentKey, ProjectionDocument, ProjectionError, ProjectionStore, Result, read_document,
};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory projection store for fast, deterministic testing.
///
/// # Example
///
/// ```
/// use booking_pipeline_testing::InMemoryProjectionStore;
/// use booking_pipeline_core::projection::ProjectionStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryProjectionStore::new();
///
/// store.save("passenger:123456789", b"{}").await?;
///
/// let data = store.get("passenger:123456789").await?;
/// assert!(data.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryProjectionStore {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    failing_saves: Arc<AtomicUsize>,
    saves: Arc<AtomicUsize>,
}

impl InMemoryProjectionStore {
    /// Create a new empty in-memory projection store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` saves fail with [`ProjectionError::Storage`].
    ///
    /// Simulates a read database that is briefly unavailable.
    pub fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Clear all projection data (for test isolation)
    pub fn clear(&self) {
        self.data.write().unwrap().clear();
    }

    /// Get the number of stored documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().unwrap().is_empty()
    }

    /// Check if a key exists in the store
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().unwrap().contains_key(key)
    }

    /// Get all keys in the store, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.data.read().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Load a typed document.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Serialization`] if the stored bytes are not a `D` document.
    pub async fn document<D: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<ProjectionDocument<D>>> {
        read_document(self, &DocumentKey::new(collection, id)).await
    }

    fn take_failure(&self) -> bool {
        self.failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    async fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        if self.take_failure() {
            return Err(ProjectionError::Storage(format!(
                "injected failure saving '{key}'"
            )));
        }
        self.data
            .write()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.read().unwrap().contains_key(key))
    }
}
