//! In-memory durable storage for tests and ephemeral hosts

use dashmap::DashMap;
use lexis_core::{DurableStorage, StateResult};
use std::sync::Arc;

/// In-memory key-value storage
///
/// Clones share nothing; wrap in an `Arc` to hand the same storage to
/// several store instances.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    pub fn with_data(data: Vec<(String, String)>) -> Self {
        let storage = Self::new();
        for (key, value) in data {
            storage.data.insert(key, value);
        }
        storage
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Clone for MemoryStorage {
    fn clone(&self) -> Self {
        let storage = Self::new();
        for entry in self.data.iter() {
            storage.data.insert(entry.key().clone(), entry.value().clone());
        }
        storage
    }
}

impl DurableStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> StateResult<Option<String>> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> StateResult<()> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StateResult<()> {
        self.data.remove(key);
        Ok(())
    }
}

/// Thread-safe storage handle shared by store instances
pub type SharedStorage = Arc<dyn DurableStorage>;

/// Create a shared in-memory storage
pub fn create_memory_storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new())
}
