//! In-memory key-value storage implementation
//!
//! Clones share the same underlying maps, so a clone kept by a test outlives
//! the node that wrote to it and plays the role of the disk across a
//! simulated restart.

use async_trait::async_trait;
use bytes::Bytes;
use group0_storage::{KeyValueStorage, StorageKey, StorageNamespace, StorageResult};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::RwLock;
use tracing::trace;

/// In-memory storage using a BTreeMap per namespace
#[derive(Clone, Default)]
pub struct MemoryStorage {
    /// namespace -> (key -> bytes)
    data: Arc<RwLock<HashMap<StorageNamespace, BTreeMap<StorageKey, Bytes>>>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored in a namespace
    pub async fn len(&self, namespace: &StorageNamespace) -> usize {
        self.data
            .read()
            .await
            .get(namespace)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get(
        &self,
        namespace: &StorageNamespace,
        key: &StorageKey,
    ) -> StorageResult<Option<Bytes>> {
        let data = self.data.read().await;
        Ok(data.get(namespace).and_then(|m| m.get(key)).cloned())
    }

    async fn put(
        &self,
        namespace: &StorageNamespace,
        key: &StorageKey,
        value: Bytes,
    ) -> StorageResult<()> {
        trace!("put {}/{} ({} bytes)", namespace, key, value.len());
        self.data
            .write()
            .await
            .entry(namespace.clone())
            .or_insert_with(BTreeMap::new)
            .insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, namespace: &StorageNamespace, key: &StorageKey) -> StorageResult<()> {
        if let Some(map) = self.data.write().await.get_mut(namespace) {
            map.remove(key);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("data", &"<locked>")
            .finish()
    }
}
