use crate::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use transfer_core::models::StorageTier;
use transfer_core::StorageBackend;

type Objects = HashMap<(StorageTier, String), Bytes>;

/// Storage that keeps every object in process memory
///
/// Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<Mutex<Objects>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, Objects> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Keys held in one tier, sorted.
    pub fn keys(&self, tier: StorageTier) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects()
            .keys()
            .filter(|(t, _)| *t == tier)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn write(&self, tier: StorageTier, key: &str, data: Bytes) -> StorageResult<u64> {
        let size = data.len() as u64;
        self.objects().insert((tier, key.to_string()), data);
        Ok(size)
    }

    async fn read(&self, tier: StorageTier, key: &str) -> StorageResult<Bytes> {
        self.objects()
            .get(&(tier, key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, tier: StorageTier, key: &str) -> StorageResult<()> {
        self.objects().remove(&(tier, key.to_string()));
        Ok(())
    }

    async fn delete_prefix(&self, tier: StorageTier, prefix: &str) -> StorageResult<u64> {
        let mut objects = self.objects();
        let before = objects.len();
        objects.retain(|(t, k), _| !(*t == tier && k.starts_with(prefix)));
        Ok((before - objects.len()) as u64)
    }

    async fn exists(&self, tier: StorageTier, key: &str) -> StorageResult<bool> {
        Ok(self.objects().contains_key(&(tier, key.to_string())))
    }

    async fn content_length(&self, tier: StorageTier, key: &str) -> StorageResult<u64> {
        self.objects()
            .get(&(tier, key.to_string()))
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn copy_between(
        &self,
        from: StorageTier,
        to: StorageTier,
        key: &str,
    ) -> StorageResult<u64> {
        let mut objects = self.objects();
        let data = objects
            .get(&(from, key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let size = data.len() as u64;
        objects.insert((to, key.to_string()), data);
        Ok(size)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
