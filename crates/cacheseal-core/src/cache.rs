use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by blob cache implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Requested key does not exist.
    #[error("entry not found for key: {key}")]
    NotFound { key: String },
    /// Underlying storage failure.
    #[error("cache failure: {reason}")]
    Storage { reason: String },
}

/// Key/value blob cache the secure cache writes ciphertext into.
///
/// Eviction and expiry belong to the concrete engine, not to this contract.
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Persist a value under a key, overwriting any existing entry.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    /// Retrieve the value for a key.
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError>;

    /// Remove a key and its value (idempotent).
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// In-memory blob cache for tests and smoke runs. Stores bytes as given.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBlobCache {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored bytes, bypassing any decryption layered on top.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().ok()?.get(key).cloned()
    }
}

#[async_trait]
impl BlobCache for InMemoryBlobCache {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let mut map = self.inner.lock().map_err(|err| CacheError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let map = self.inner.lock().map_err(|err| CacheError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;

        map.get(key).cloned().ok_or_else(|| CacheError::NotFound {
            key: key.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut map = self.inner.lock().map_err(|err| CacheError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.remove(key);
        Ok(())
    }
}
