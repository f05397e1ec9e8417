//! Core contracts for cacheseal: key material stores, encryption providers and
//! the blob cache boundary. No platform or crypto dependencies live here.

pub mod cache;
pub mod keys;
pub mod provider;

pub use keys::{
    AccessScope, HandleKind, KeyHandle, KeyMaterialStore, KeyName, KeyPairHandle, KeySize,
    KeyStoreError, ProviderConfig,
};
pub use provider::{DeferredBlock, EncryptionProvider, ProviderError};
