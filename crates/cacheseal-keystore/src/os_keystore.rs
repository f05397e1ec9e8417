use std::sync::Arc;

use cacheseal_core::{KeyMaterialStore, KeyName, KeyPairHandle, KeyStoreError, ProviderConfig};
use tracing::{debug, info, instrument};

use crate::{
    rsa_keys::{RsaPrivateHandle, RsaPublicHandle},
    vault::SecretVault,
};

/// Vault service holding keystore aliases. Do not change: existing keys live here.
pub const KEYSTORE_SERVICE: &str = "cacheseal.keystore";

const CERT_SUFFIX: &str = ".cert";

/// OS key store model: an alias owns a private key entry and a sibling
/// certificate entry carrying the public key. Callers only ever see opaque
/// handles.
pub struct KeystoreKeyStore<V: SecretVault> {
    vault: V,
}

impl<V: SecretVault> KeystoreKeyStore<V> {
    pub fn new(vault: V) -> Self {
        Self { vault }
    }

    fn contains_alias(&self, name: &KeyName) -> Result<bool, KeyStoreError> {
        Ok(self.vault.get(KEYSTORE_SERVICE, name.as_str())?.is_some())
    }
}

fn cert_alias(name: &KeyName) -> String {
    format!("{name}{CERT_SUFFIX}")
}

impl<V: SecretVault> KeyMaterialStore for KeystoreKeyStore<V> {
    fn exists(&self, name: &KeyName) -> Result<bool, KeyStoreError> {
        self.contains_alias(name)
    }

    #[instrument(skip_all, fields(name = %name, bits = config.key_size.bits()))]
    fn create(
        &self,
        name: &KeyName,
        config: &ProviderConfig,
    ) -> Result<KeyPairHandle, KeyStoreError> {
        if self.delete(name)? {
            info!("replaced existing key pair");
        }

        // The alias entry marks the pair as present, so it is written last.
        let handle = RsaPrivateHandle::generate(config.key_size)?;
        self.vault.set(
            KEYSTORE_SERVICE,
            &cert_alias(name),
            &handle.public_handle().encode()?,
        )?;
        self.vault
            .set(KEYSTORE_SERVICE, name.as_str(), &handle.encode()?)?;
        info!("generated key pair");
        Ok(Arc::new(handle))
    }

    #[instrument(skip_all, fields(name = %name))]
    fn fetch_private(&self, name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
        let Some(encoded) = self.vault.get(KEYSTORE_SERVICE, name.as_str())? else {
            debug!("alias not found");
            return Ok(None);
        };
        let handle = RsaPrivateHandle::decode(&encoded)?;
        Ok(Some(Arc::new(handle)))
    }

    #[instrument(skip_all, fields(name = %name))]
    fn fetch_public(&self, name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
        if !self.contains_alias(name)? {
            debug!("alias not found");
            return Ok(None);
        }
        match self.vault.get(KEYSTORE_SERVICE, &cert_alias(name))? {
            Some(encoded) => Ok(Some(Arc::new(RsaPublicHandle::decode(&encoded)?))),
            None => {
                debug!("alias has no certificate");
                Ok(None)
            }
        }
    }

    #[instrument(skip_all, fields(name = %name))]
    fn delete(&self, name: &KeyName) -> Result<bool, KeyStoreError> {
        let removed = self.vault.remove(KEYSTORE_SERVICE, name.as_str())?;
        if self.vault.remove(KEYSTORE_SERVICE, &cert_alias(name))? && !removed {
            debug!("removed orphaned certificate");
        }
        if removed {
            debug!("deleted key pair");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cacheseal_core::{HandleKind, KeySize};

    use super::*;
    use crate::vault::InMemoryVault;

    /// Fails every `set` after the first `allowed_sets`.
    struct FlakyVault {
        inner: InMemoryVault,
        sets: AtomicUsize,
        allowed_sets: usize,
    }

    impl FlakyVault {
        fn new(inner: InMemoryVault, allowed_sets: usize) -> Self {
            Self {
                inner,
                sets: AtomicUsize::new(0),
                allowed_sets,
            }
        }
    }

    impl SecretVault for FlakyVault {
        fn get(&self, service: &str, account: &str) -> Result<Option<String>, KeyStoreError> {
            self.inner.get(service, account)
        }

        fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), KeyStoreError> {
            if self.sets.fetch_add(1, Ordering::SeqCst) >= self.allowed_sets {
                return Err(KeyStoreError::Backend("vault write rejected".into()));
            }
            self.inner.set(service, account, secret)
        }

        fn remove(&self, service: &str, account: &str) -> Result<bool, KeyStoreError> {
            self.inner.remove(service, account)
        }
    }

    fn config() -> ProviderConfig {
        ProviderConfig {
            key_size: KeySize::Bits1024,
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn absent_alias_is_not_an_error() {
        let store = KeystoreKeyStore::new(InMemoryVault::new());
        let name = KeyName::new("never_created");

        assert!(!store.exists(&name).unwrap());
        assert!(store.fetch_private(&name).unwrap().is_none());
        assert!(store.fetch_public(&name).unwrap().is_none());
        assert!(!store.delete(&name).unwrap());
    }

    #[test]
    fn create_persists_both_halves() {
        let vault = InMemoryVault::new();
        let store = KeystoreKeyStore::new(vault.clone());
        let name = KeyName::for_application("demo");
        store.create(&name, &config()).expect("create");

        assert!(store.exists(&name).unwrap());
        assert!(store.exists(&name).unwrap());
        assert_eq!(vault.len(), 2);

        let public = store.fetch_public(&name).unwrap().expect("public");
        let private = store.fetch_private(&name).unwrap().expect("private");
        assert_eq!(public.kind(), HandleKind::Public);
        assert_eq!(private.kind(), HandleKind::Private);

        let cipher = public.encrypt(b"abc").unwrap();
        assert_eq!(private.decrypt(&cipher).unwrap(), b"abc");
    }

    #[test]
    fn create_again_rotates_the_key() {
        let store = KeystoreKeyStore::new(InMemoryVault::new());
        let name = KeyName::new("rotating");
        let first = store.create(&name, &config()).expect("create");
        let cipher = first.encrypt(b"old entry").unwrap();

        store.create(&name, &config()).expect("recreate");
        let current = store.fetch_private(&name).unwrap().expect("private");
        assert!(current.decrypt(&cipher).is_err());
    }

    #[test]
    fn delete_removes_alias_and_certificate() {
        let vault = InMemoryVault::new();
        let store = KeystoreKeyStore::new(vault.clone());
        let name = KeyName::new("short_lived");
        store.create(&name, &config()).expect("create");

        assert!(store.delete(&name).unwrap());
        assert!(!store.exists(&name).unwrap());
        assert!(vault.is_empty());
    }

    #[test]
    fn interrupted_create_leaves_no_alias() {
        let vault = InMemoryVault::new();
        let store = KeystoreKeyStore::new(FlakyVault::new(vault.clone(), 1));
        let name = KeyName::new("interrupted");

        let err = store.create(&name, &config()).expect_err("second write fails");
        assert!(matches!(err, KeyStoreError::Backend(_)));
        assert!(!store.exists(&name).unwrap(), "pair must not look present");
        assert!(store.fetch_public(&name).unwrap().is_none());

        // A healthy store over the same vault recreates the pair and the
        // orphaned certificate is overwritten.
        let healthy = KeystoreKeyStore::new(vault.clone());
        healthy.create(&name, &config()).expect("recreate");
        let public = healthy.fetch_public(&name).unwrap().expect("public");
        let private = healthy.fetch_private(&name).unwrap().expect("private");
        let cipher = public.encrypt(b"after recovery").unwrap();
        assert_eq!(private.decrypt(&cipher).unwrap(), b"after recovery");
        assert_eq!(vault.len(), 2);
    }

    #[test]
    fn delete_clears_orphaned_certificate() {
        let vault = InMemoryVault::new();
        let store = KeystoreKeyStore::new(FlakyVault::new(vault.clone(), 1));
        let name = KeyName::new("orphan");
        store.create(&name, &config()).expect_err("second write fails");
        assert_eq!(vault.len(), 1);

        assert!(!store.delete(&name).unwrap(), "no pair was present");
        assert!(vault.is_empty());
    }
}
