use std::{future::Future, pin::Pin};

use thiserror::Error;

use crate::keys::KeyStoreError;

/// Errors surfaced by an [`EncryptionProvider`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// An absent block was passed in. Raised before any work is scheduled.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },
    /// The key half needed for this call is not held by the provider.
    #[error("key unavailable: {reason}")]
    KeyUnavailable { reason: String },
    /// The store or cipher reported a failure.
    #[error("platform crypto failure: {reason}")]
    PlatformCrypto { reason: String },
    /// Key resolution failed while the provider was being built.
    #[error("provider construction failed: {reason}")]
    Construction { reason: String },
    /// The background unit of work died before producing a result.
    #[error("background task failed: {reason}")]
    Scheduling { reason: String },
}

impl From<KeyStoreError> for ProviderError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::MissingPrivateKey => ProviderError::KeyUnavailable {
                reason: err.to_string(),
            },
            other => ProviderError::PlatformCrypto {
                reason: other.to_string(),
            },
        }
    }
}

/// Eventual outcome of one scheduled encrypt/decrypt call.
///
/// The work is already submitted when this is returned; dropping it discards the
/// result without cancelling the work.
pub type DeferredBlock = Pin<Box<dyn Future<Output = Result<Vec<u8>, ProviderError>> + Send>>;

/// Transforms opaque blocks before they are written to, or after they are read
/// from, a local cache.
pub trait EncryptionProvider: Send + Sync {
    /// Encrypt one block. `None` fails immediately with
    /// [`ProviderError::InvalidInput`].
    fn encrypt_block(&self, block: Option<Vec<u8>>) -> Result<DeferredBlock, ProviderError>;

    /// Decrypt one block. `None` fails immediately with
    /// [`ProviderError::InvalidInput`].
    fn decrypt_block(&self, block: Option<Vec<u8>>) -> Result<DeferredBlock, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_private_key_maps_to_key_unavailable() {
        let err = ProviderError::from(KeyStoreError::MissingPrivateKey);
        assert!(matches!(err, ProviderError::KeyUnavailable { .. }));
    }

    #[test]
    fn store_failures_keep_their_reason() {
        let err = ProviderError::from(KeyStoreError::Cipher("decryption error".into()));
        assert_eq!(
            err,
            ProviderError::PlatformCrypto {
                reason: "cipher error: decryption error".into()
            }
        );
    }
}
