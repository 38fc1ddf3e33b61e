//! Store trait and an in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::types::{ResourceId, ResourceRecord};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Client for the shared control-plane store.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch the current copy of a record.
    async fn get(&self, id: &ResourceId) -> StoreResult<ResourceRecord>;

    /// Write a record if its `resource_version` still matches the stored one.
    ///
    /// Returns the stored copy carrying the new version.
    async fn update(&self, record: &ResourceRecord) -> StoreResult<ResourceRecord>;
}

#[async_trait]
impl<S: ResourceStore + ?Sized> ResourceStore for Arc<S> {
    async fn get(&self, id: &ResourceId) -> StoreResult<ResourceRecord> {
        (**self).get(id).await
    }

    async fn update(&self, record: &ResourceRecord) -> StoreResult<ResourceRecord> {
        (**self).update(record).await
    }
}

/// In-memory store with control-plane deletion semantics.
///
/// Deleting a record that still carries finalizers only stamps its deletion
/// timestamp; the record disappears once an update leaves it with no
/// finalizers.
#[derive(Default)]
pub struct InMemoryResourceStore {
    records: RwLock<HashMap<ResourceId, ResourceRecord>>,
}

impl InMemoryResourceStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Store a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if a record with the same identity exists.
    pub async fn create(&self, record: ResourceRecord) -> StoreResult<ResourceRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists {
                id: record.id.clone(),
            });
        }

        let stored = ResourceRecord {
            resource_version: 1,
            deletion_timestamp: None,
            ..record
        };
        records.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    /// Request deletion of a record.
    ///
    /// Returns the record with its deletion timestamp set, or `None` if the
    /// record had no finalizers and was removed outright.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    pub async fn delete(&self, id: &ResourceId) -> StoreResult<Option<ResourceRecord>> {
        let mut records = self.records.write().await;
        let Some(current) = records.get_mut(id) else {
            return Err(StoreError::not_found(id));
        };

        if current.finalizers.is_empty() {
            debug!(resource = %id, "Removing record without finalizers");
            records.remove(id);
            return Ok(None);
        }

        if current.deletion_timestamp.is_none() {
            current.deletion_timestamp = Some(Utc::now());
            current.resource_version = current.resource_version.saturating_add(1);
        }
        debug!(resource = %id, finalizers = ?current.finalizers, "Deletion blocked by finalizers");
        Ok(Some(current.clone()))
    }

    /// Identities of all records owned by `owner`.
    pub async fn owned_by(&self, owner: &ResourceId) -> Vec<ResourceId> {
        let records = self.records.read().await;
        let mut owned: Vec<ResourceId> = records
            .values()
            .filter(|r| r.owner.as_ref() == Some(owner))
            .map(|r| r.id.clone())
            .collect();
        owned.sort();
        owned
    }

    /// Whether a record is currently stored.
    pub async fn contains(&self, id: &ResourceId) -> bool {
        self.records.read().await.contains_key(id)
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, id: &ResourceId) -> StoreResult<ResourceRecord> {
        let records = self.records.read().await;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))
    }

    async fn update(&self, record: &ResourceRecord) -> StoreResult<ResourceRecord> {
        let mut records = self.records.write().await;
        let Some(current) = records.get(&record.id) else {
            return Err(StoreError::not_found(&record.id));
        };

        if current.resource_version != record.resource_version {
            return Err(StoreError::conflict(
                &record.id,
                record.resource_version,
                current.resource_version,
            ));
        }

        // The deletion timestamp is owned by the store, never by writers.
        let stored = ResourceRecord {
            resource_version: current.resource_version.saturating_add(1),
            deletion_timestamp: current.deletion_timestamp,
            ..record.clone()
        };

        if stored.is_pending_deletion() && stored.finalizers.is_empty() {
            debug!(resource = %record.id, "Last finalizer removed, deleting record");
            records.remove(&record.id);
        } else {
            records.insert(stored.id.clone(), stored.clone());
        }
        Ok(stored)
    }
}
