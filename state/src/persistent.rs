//! Durable storage backed by a sled database

use lexis_core::{DurableStorage, StateError, StateResult};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

const ITEMS_TREE: &str = "items";

/// Key-value storage persisted to disk with sled
pub struct SledStorage {
    db: Db,
    items: Tree,
}

impl SledStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let db = sled::open(path).map_err(|e| StateError::Storage(e.to_string()))?;
        let items = db
            .open_tree(ITEMS_TREE)
            .map_err(|e| StateError::Storage(e.to_string()))?;

        Ok(Self { db, items })
    }

    /// Number of stored keys
    pub fn size_estimate(&self) -> u64 {
        self.items.len() as u64
    }

    pub fn flush(&self) -> StateResult<()> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| StateError::Storage(e.to_string()))
    }
}

impl DurableStorage for SledStorage {
    fn get_item(&self, key: &str) -> StateResult<Option<String>> {
        let Some(bytes) = self
            .items
            .get(key.as_bytes())
            .map_err(|e| StateError::Storage(e.to_string()))?
        else {
            return Ok(None);
        };

        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| StateError::Storage(format!("value under '{}' is not UTF-8: {}", key, e)))
    }

    fn set_item(&self, key: &str, value: &str) -> StateResult<()> {
        self.items
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| StateError::Storage(e.to_string()))?;

        // Flush to disk
        self.flush()
    }

    fn remove_item(&self, key: &str) -> StateResult<()> {
        self.items
            .remove(key.as_bytes())
            .map_err(|e| StateError::Storage(e.to_string()))?;
        self.flush()
    }
}

/// Open a shared sled-backed storage
pub fn open_sled_storage<P: AsRef<Path>>(path: P) -> StateResult<Arc<SledStorage>> {
    Ok(Arc::new(SledStorage::open(path)?))
}
