//! In-process [`ObjectStore`], used for dry runs and tests.

use super::{ObjectStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current body of `key`, if any.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn insert(&self, key: &str, body: impl Into<Bytes>) {
        if let Ok(mut m) = self.objects.lock() {
            m.insert(key.to_string(), body.into());
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn count_prefix(&self, prefix: &str, limit: i32) -> Result<usize, StoreError> {
        let m = self
            .objects
            .lock()
            .map_err(|e| StoreError::other("list", prefix, e))?;
        let n = m.keys().filter(|k| k.starts_with(prefix)).count();
        Ok(n.min(limit.max(0) as usize))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let m = self
            .objects
            .lock()
            .map_err(|e| StoreError::other("get", key, e))?;
        m.get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        let mut m = self
            .objects
            .lock()
            .map_err(|e| StoreError::other("put", key, e))?;
        m.insert(key.to_string(), body);
        Ok(())
    }
}
