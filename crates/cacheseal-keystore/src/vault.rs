use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use cacheseal_core::KeyStoreError;
use tracing::debug;

/// Persistent, access-controlled string secrets addressed by (service, account).
///
/// The OS credential store in production; memory in tests.
pub trait SecretVault: Send + Sync {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, KeyStoreError>;

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), KeyStoreError>;

    /// Returns whether an entry was actually removed.
    fn remove(&self, service: &str, account: &str) -> Result<bool, KeyStoreError>;
}

/// OS keyring-backed vault. Uses the `keyring` crate for every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringVault;

impl KeyringVault {
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, account: &str) -> Result<keyring::Entry, KeyStoreError> {
        keyring::Entry::new(service, account).map_err(keyring_err)
    }
}

impl SecretVault for KeyringVault {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, KeyStoreError> {
        match Self::entry(service, account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(keyring_err(err)),
        }
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), KeyStoreError> {
        Self::entry(service, account)?
            .set_password(secret)
            .map_err(keyring_err)
    }

    fn remove(&self, service: &str, account: &str) -> Result<bool, KeyStoreError> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => {
                debug!(service, account, "nothing to remove");
                Ok(false)
            }
            Err(err) => Err(keyring_err(err)),
        }
    }
}

fn keyring_err(err: keyring::Error) -> KeyStoreError {
    KeyStoreError::Backend(format!("keyring: {err}"))
}

/// In-memory vault for tests and ephemeral sessions. Clones share state, which
/// stands in for a store that survives process restarts.
#[derive(Debug, Default, Clone)]
pub struct InMemoryVault {
    inner: Arc<Mutex<HashMap<(String, String), String>>>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all services.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), String>>, KeyStoreError> {
        self.inner
            .lock()
            .map_err(|err| KeyStoreError::Backend(format!("lock poisoned: {err}")))
    }
}

impl SecretVault for InMemoryVault {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, KeyStoreError> {
        let map = self.lock()?;
        Ok(map.get(&(service.to_string(), account.to_string())).cloned())
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), KeyStoreError> {
        let mut map = self.lock()?;
        map.insert(
            (service.to_string(), account.to_string()),
            secret.to_string(),
        );
        Ok(())
    }

    fn remove(&self, service: &str, account: &str) -> Result<bool, KeyStoreError> {
        let mut map = self.lock()?;
        Ok(map
            .remove(&(service.to_string(), account.to_string()))
            .is_some())
    }
}

impl<V: SecretVault + ?Sized> SecretVault for Arc<V> {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, KeyStoreError> {
        (**self).get(service, account)
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), KeyStoreError> {
        (**self).set(service, account, secret)
    }

    fn remove(&self, service: &str, account: &str) -> Result<bool, KeyStoreError> {
        (**self).remove(service, account)
    }
}
