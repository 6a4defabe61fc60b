use async_trait::async_trait;
use dashmap::DashMap;
use ng_edge_error::StorageResult;
use ng_edge_models::IdentityStore;

/// Volatile identity store backed by a concurrent map.
///
/// Used by tests and as the fallback when the embedded database cannot be
/// opened. Contents do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    entries: DashMap<String, String>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn entries(&self) -> StorageResult<Vec<(String, String)>> {
        Ok(self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }
}
