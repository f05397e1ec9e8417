use std::sync::Arc;

use cacheseal_core::{
    cache::{BlobCache, CacheError},
    EncryptionProvider, ProviderError,
};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecureCacheError {
    #[error("entry not found for key: {key}")]
    NotFound { key: String },
    #[error(transparent)]
    Cache(CacheError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl From<CacheError> for SecureCacheError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound { key } => SecureCacheError::NotFound { key },
            other => SecureCacheError::Cache(other),
        }
    }
}

/// Blob cache whose values are encrypted before they are written and decrypted
/// after they are read. A failed transform fails the whole read or write.
///
/// After a key rotation, entries written under the old key no longer decrypt;
/// invalidate them.
pub struct SecureCache<C: BlobCache, P: EncryptionProvider> {
    cache: C,
    provider: Arc<P>,
}

impl<C: BlobCache, P: EncryptionProvider> SecureCache<C, P> {
    pub fn new(cache: C, provider: Arc<P>) -> Self {
        Self { cache, provider }
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn insert(&self, key: &str, value: Vec<u8>) -> Result<(), SecureCacheError> {
        let encrypted = self.provider.encrypt_block(Some(value))?.await?;
        self.cache.put(key, encrypted).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, SecureCacheError> {
        let stored = self.cache.get(key).await?;
        Ok(self.provider.decrypt_block(Some(stored))?.await?)
    }

    /// Drop an entry (idempotent).
    #[instrument(skip_all, fields(key = %key))]
    pub async fn invalidate(&self, key: &str) -> Result<(), SecureCacheError> {
        self.cache.delete(key).await?;
        Ok(())
    }
}
