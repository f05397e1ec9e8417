//! Concrete key material stores. Key pairs are persisted through a
//! `SecretVault` (OS keyring in production, memory in tests).

use std::sync::Arc;

use cacheseal_core::{AccessScope, KeyMaterialStore};
use serde::{Deserialize, Serialize};

pub mod data_protection;
pub mod keychain;
pub mod os_keystore;
pub mod rsa_keys;
pub mod vault;

pub use data_protection::DataProtectionStore;
pub use keychain::KeychainKeyStore;
pub use os_keystore::KeystoreKeyStore;
pub use vault::{InMemoryVault, KeyringVault, SecretVault};

/// Which platform key store model to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    /// Alias-addressed key store with opaque handles.
    Keystore,
    /// Attribute-tagged keychain items.
    #[default]
    Keychain,
    /// System-managed protection context, no key pair.
    DataProtection,
}

/// Open a store of the given kind over `vault`. Scope flags are bound here.
pub fn open_store<V>(kind: StoreKind, vault: V, scope: AccessScope) -> Arc<dyn KeyMaterialStore>
where
    V: SecretVault + 'static,
{
    match kind {
        StoreKind::Keystore => Arc::new(KeystoreKeyStore::new(vault)),
        StoreKind::Keychain => Arc::new(KeychainKeyStore::new(vault, scope)),
        StoreKind::DataProtection => Arc::new(DataProtectionStore::new(vault, scope)),
    }
}
