use cacheseal_core::{
    DeferredBlock, EncryptionProvider, KeyMaterialStore, KeyName, KeyPairHandle, ProviderConfig,
    ProviderError,
};
use tracing::{debug, info, instrument, warn};

use crate::scheduler::Scheduler;

/// Encryption provider over a key material store.
///
/// Key resolution happens once, synchronously, in [`KeyStoreEncryptionProvider::new`];
/// afterwards the provider only holds the resolved handles. Construct at most one
/// provider per [`KeyName`] at a time (see `ProviderRegistry`): concurrent
/// construction can interleave create/delete on the store.
#[derive(Debug)]
pub struct KeyStoreEncryptionProvider {
    name: KeyName,
    public: Option<KeyPairHandle>,
    private: Option<KeyPairHandle>,
    scheduler: Scheduler,
}

impl KeyStoreEncryptionProvider {
    /// Resolve (creating if needed) the key pair for `name` and bind to `scheduler`.
    #[instrument(skip_all, fields(name = %name))]
    pub fn new<S>(
        store: &S,
        name: KeyName,
        config: &ProviderConfig,
        scheduler: Scheduler,
    ) -> Result<Self, ProviderError>
    where
        S: KeyMaterialStore + ?Sized,
    {
        let (public, private) = resolve_keys(store, &name, config).map_err(|err| {
            warn!(error = %err, "key resolution failed");
            err
        })?;

        if public.is_none() && private.is_none() {
            warn!("store yielded no key material after creation");
            return Err(ProviderError::Construction {
                reason: format!("no key material available for {name}"),
            });
        }

        info!(
            public = public.is_some(),
            private = private.is_some(),
            "encryption provider ready"
        );
        Ok(Self {
            name,
            public,
            private,
            scheduler,
        })
    }

    pub fn key_name(&self) -> &KeyName {
        &self.name
    }

    /// Jobs handed to the background scheduler so far.
    pub fn submitted_jobs(&self) -> u64 {
        self.scheduler.submitted()
    }

    /// Largest block one encrypt call accepts; `None` when the store manages a
    /// protection context instead of an RSA key.
    pub fn max_plaintext_len(&self) -> Option<usize> {
        self.public
            .as_ref()
            .or(self.private.as_ref())
            .and_then(|handle| handle.key_size())
            .map(|size| size.max_plaintext_len())
    }

    fn handle_for(
        &self,
        handle: &Option<KeyPairHandle>,
        half: &str,
    ) -> Result<KeyPairHandle, ProviderError> {
        handle.clone().ok_or_else(|| ProviderError::KeyUnavailable {
            reason: format!("{half} key for {} is not available", self.name),
        })
    }
}

fn resolve_keys<S>(
    store: &S,
    name: &KeyName,
    config: &ProviderConfig,
) -> Result<(Option<KeyPairHandle>, Option<KeyPairHandle>), ProviderError>
where
    S: KeyMaterialStore + ?Sized,
{
    let construction = |err: cacheseal_core::KeyStoreError| ProviderError::Construction {
        reason: err.to_string(),
    };

    if store.exists(name).map_err(construction)? {
        debug!("reusing existing key pair");
    } else {
        info!(bits = config.key_size.bits(), "no key pair found, creating one");
        store.create(name, config).map_err(construction)?;
    }

    let private = store.fetch_private(name).map_err(construction)?;
    let public = store.fetch_public(name).map_err(construction)?;
    Ok((public, private))
}

fn require_block(block: Option<Vec<u8>>) -> Result<Vec<u8>, ProviderError> {
    block.ok_or_else(|| ProviderError::InvalidInput {
        reason: "block cannot be absent".to_string(),
    })
}

impl EncryptionProvider for KeyStoreEncryptionProvider {
    fn encrypt_block(&self, block: Option<Vec<u8>>) -> Result<DeferredBlock, ProviderError> {
        let plain = require_block(block)?;
        let public = self.handle_for(&self.public, "public");

        Ok(self.scheduler.submit(move || {
            let ciphertext = public?.encrypt(&plain)?;
            if ciphertext == plain {
                return Err(ProviderError::PlatformCrypto {
                    reason: "encryption produced unchanged output".to_string(),
                });
            }
            Ok(ciphertext)
        }))
    }

    fn decrypt_block(&self, block: Option<Vec<u8>>) -> Result<DeferredBlock, ProviderError> {
        let cipher = require_block(block)?;
        let private = self.handle_for(&self.private, "private");

        Ok(self
            .scheduler
            .submit(move || Ok(private?.decrypt(&cipher)?)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use cacheseal_core::{
        AccessScope, HandleKind, KeyHandle, KeySize, KeyStoreError, ProviderConfig,
    };
    use cacheseal_keystore::{
        DataProtectionStore, InMemoryVault, KeychainKeyStore, KeystoreKeyStore,
    };

    use super::*;

    fn small_config() -> ProviderConfig {
        ProviderConfig {
            key_size: KeySize::Bits1024,
            ..ProviderConfig::default()
        }
    }

    fn provider_for<S: KeyMaterialStore>(store: &S, name: &str) -> KeyStoreEncryptionProvider {
        KeyStoreEncryptionProvider::new(
            store,
            KeyName::new(name),
            &small_config(),
            Scheduler::current().expect("runtime"),
        )
        .expect("provider")
    }

    /// Counts lifecycle calls and can be told to hand out only one key half.
    struct CountingStore<S> {
        inner: S,
        creates: AtomicUsize,
        hide_private: bool,
        hide_all: bool,
    }

    impl<S: KeyMaterialStore> CountingStore<S> {
        fn new(inner: S) -> Self {
            Self {
                inner,
                creates: AtomicUsize::new(0),
                hide_private: false,
                hide_all: false,
            }
        }
    }

    impl<S: KeyMaterialStore> KeyMaterialStore for CountingStore<S> {
        fn exists(&self, name: &KeyName) -> Result<bool, KeyStoreError> {
            self.inner.exists(name)
        }

        fn create(
            &self,
            name: &KeyName,
            config: &ProviderConfig,
        ) -> Result<KeyPairHandle, KeyStoreError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.inner.create(name, config)
        }

        fn fetch_private(&self, name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
            if self.hide_private || self.hide_all {
                return Ok(None);
            }
            self.inner.fetch_private(name)
        }

        fn fetch_public(&self, name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
            if self.hide_all {
                return Ok(None);
            }
            self.inner.fetch_public(name)
        }

        fn delete(&self, name: &KeyName) -> Result<bool, KeyStoreError> {
            self.inner.delete(name)
        }
    }

    struct FailingStore;

    impl KeyMaterialStore for FailingStore {
        fn exists(&self, _name: &KeyName) -> Result<bool, KeyStoreError> {
            Err(KeyStoreError::Backend("key store unavailable".into()))
        }

        fn create(
            &self,
            _name: &KeyName,
            _config: &ProviderConfig,
        ) -> Result<KeyPairHandle, KeyStoreError> {
            unreachable!("exists fails first")
        }

        fn fetch_private(&self, _name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
            unreachable!("exists fails first")
        }

        fn fetch_public(&self, _name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
            unreachable!("exists fails first")
        }

        fn delete(&self, _name: &KeyName) -> Result<bool, KeyStoreError> {
            unreachable!("exists fails first")
        }
    }

    /// A context whose "protection" is the identity transform.
    #[derive(Debug)]
    struct IdentityContext;

    impl KeyHandle for IdentityContext {
        fn kind(&self) -> HandleKind {
            HandleKind::SystemManaged
        }

        fn key_size(&self) -> Option<KeySize> {
            None
        }

        fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
            Ok(plain.to_vec())
        }

        fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
            Ok(cipher.to_vec())
        }
    }

    struct IdentityStore;

    impl KeyMaterialStore for IdentityStore {
        fn exists(&self, _name: &KeyName) -> Result<bool, KeyStoreError> {
            Ok(true)
        }

        fn create(
            &self,
            _name: &KeyName,
            _config: &ProviderConfig,
        ) -> Result<KeyPairHandle, KeyStoreError> {
            Ok(Arc::new(IdentityContext))
        }

        fn fetch_private(&self, _name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
            Ok(Some(Arc::new(IdentityContext)))
        }

        fn fetch_public(&self, _name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
            Ok(Some(Arc::new(IdentityContext)))
        }

        fn delete(&self, _name: &KeyName) -> Result<bool, KeyStoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn fresh_device_scenario_with_2048_bit_key() {
        let store = CountingStore::new(KeychainKeyStore::new(
            InMemoryVault::new(),
            AccessScope::default(),
        ));
        let provider = KeyStoreEncryptionProvider::new(
            &store,
            KeyName::new("mycache_securestore"),
            &ProviderConfig::default(),
            Scheduler::current().expect("runtime"),
        )
        .expect("provider");
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        assert_eq!(provider.max_plaintext_len(), Some(245));

        let cipher = provider
            .encrypt_block(Some(vec![0x01, 0x02, 0x03]))
            .expect("scheduled")
            .await
            .expect("encrypt");
        assert_eq!(cipher.len(), 256);

        let plain = provider
            .decrypt_block(Some(cipher))
            .expect("scheduled")
            .await
            .expect("decrypt");
        assert_eq!(plain, vec![0x01, 0x02, 0x03]);
    }

    #[tokio::test]
    async fn round_trips_up_to_the_block_limit() {
        let store = KeystoreKeyStore::new(InMemoryVault::new());
        let provider = provider_for(&store, "limits");
        let max = provider.max_plaintext_len().expect("rsa key");

        for len in [0, 1, 64, max] {
            let plain: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let cipher = provider
                .encrypt_block(Some(plain.clone()))
                .unwrap()
                .await
                .expect("encrypt");
            let back = provider.decrypt_block(Some(cipher)).unwrap().await;
            assert_eq!(back, Ok(plain), "length {len}");
        }

        let err = provider
            .encrypt_block(Some(vec![0; max + 1]))
            .unwrap()
            .await
            .expect_err("block too large");
        assert!(matches!(err, ProviderError::PlatformCrypto { .. }));
    }

    #[tokio::test]
    async fn absent_blocks_are_rejected_before_scheduling() {
        let store = KeystoreKeyStore::new(InMemoryVault::new());
        let provider = provider_for(&store, "nulls");

        let err = provider.encrypt_block(None).err().expect("rejected");
        assert!(matches!(err, ProviderError::InvalidInput { .. }));
        let err = provider.decrypt_block(None).err().expect("rejected");
        assert!(matches!(err, ProviderError::InvalidInput { .. }));
        assert_eq!(provider.submitted_jobs(), 0);
    }

    #[tokio::test]
    async fn sequential_providers_reuse_the_stored_key() {
        let store = CountingStore::new(KeystoreKeyStore::new(InMemoryVault::new()));
        let first = provider_for(&store, "shared");
        let cipher = first
            .encrypt_block(Some(b"written by first".to_vec()))
            .unwrap()
            .await
            .unwrap();

        let second = provider_for(&store, "shared");
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        let plain = second.decrypt_block(Some(cipher)).unwrap().await.unwrap();
        assert_eq!(plain, b"written by first");
    }

    #[tokio::test]
    async fn rotation_makes_old_ciphertext_undecryptable() {
        let store = KeystoreKeyStore::new(InMemoryVault::new());
        let name = KeyName::new("rotated");
        let before = provider_for(&store, name.as_str());
        let cipher = before
            .encrypt_block(Some(b"stale entry".to_vec()))
            .unwrap()
            .await
            .unwrap();

        store.create(&name, &small_config()).expect("rotate");
        let after = provider_for(&store, name.as_str());
        let err = after
            .decrypt_block(Some(cipher))
            .unwrap()
            .await
            .expect_err("old ciphertext must not decrypt");
        assert!(matches!(
            err,
            ProviderError::PlatformCrypto { .. } | ProviderError::KeyUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn missing_private_half_fails_decrypt_only() {
        let mut store = CountingStore::new(KeystoreKeyStore::new(InMemoryVault::new()));
        store.hide_private = true;
        let provider = provider_for(&store, "public_only");

        let cipher = provider
            .encrypt_block(Some(b"still encryptable".to_vec()))
            .unwrap()
            .await
            .expect("encrypt");
        let err = provider
            .decrypt_block(Some(cipher))
            .unwrap()
            .await
            .expect_err("no private key");
        assert!(matches!(err, ProviderError::KeyUnavailable { .. }));
    }

    #[tokio::test]
    async fn construction_fails_without_key_material() {
        let mut store = CountingStore::new(KeystoreKeyStore::new(InMemoryVault::new()));
        store.hide_all = true;
        let err = KeyStoreEncryptionProvider::new(
            &store,
            KeyName::new("empty"),
            &small_config(),
            Scheduler::current().unwrap(),
        )
        .expect_err("nothing usable");
        assert!(matches!(err, ProviderError::Construction { .. }));
    }

    #[tokio::test]
    async fn construction_propagates_store_failures() {
        let err = KeyStoreEncryptionProvider::new(
            &FailingStore,
            KeyName::new("broken"),
            &small_config(),
            Scheduler::current().unwrap(),
        )
        .expect_err("store down");
        assert_eq!(
            err,
            ProviderError::Construction {
                reason: "key store backend error: key store unavailable".into()
            }
        );
    }

    #[tokio::test]
    async fn unchanged_output_is_reported_as_failure() {
        let provider = provider_for(&IdentityStore, "identity");
        let err = provider
            .encrypt_block(Some(b"plain".to_vec()))
            .unwrap()
            .await
            .expect_err("identity transform is not protection");
        assert!(matches!(err, ProviderError::PlatformCrypto { .. }));
    }

    #[tokio::test]
    async fn data_protection_store_uses_the_same_contract() {
        let store = CountingStore::new(DataProtectionStore::new(
            InMemoryVault::new(),
            AccessScope::default(),
        ));
        let provider = provider_for(&store, "protected");
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
        assert_eq!(provider.max_plaintext_len(), None);

        let big = vec![9u8; 4096];
        let cipher = provider
            .encrypt_block(Some(big.clone()))
            .unwrap()
            .await
            .unwrap();
        let plain = provider.decrypt_block(Some(cipher)).unwrap().await.unwrap();
        assert_eq!(plain, big);
    }

    #[tokio::test]
    async fn concurrent_calls_complete_independently() {
        let store = KeystoreKeyStore::new(InMemoryVault::new());
        let provider = Arc::new(provider_for(&store, "parallel"));

        let pending: Vec<_> = (0u8..8)
            .map(|i| (i, provider.encrypt_block(Some(vec![i; 4])).unwrap()))
            .collect();
        for (i, deferred) in pending.into_iter().rev() {
            let cipher = deferred.await.unwrap();
            let plain = provider.decrypt_block(Some(cipher)).unwrap().await.unwrap();
            assert_eq!(plain, vec![i; 4]);
        }
        assert_eq!(provider.submitted_jobs(), 16);
    }
}
