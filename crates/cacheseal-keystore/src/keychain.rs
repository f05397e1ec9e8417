use std::sync::Arc;

use cacheseal_core::{
    AccessScope, KeyHandle, KeyMaterialStore, KeyName, KeyPairHandle, KeyStoreError,
    ProviderConfig,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::{rsa_keys::RsaPrivateHandle, vault::SecretVault};

pub const KEYCHAIN_SERVICE: &str = "cacheseal.keychain";

const KEY_TYPE_RSA: &str = "rsa";
const ACCESSIBLE_WHEN_UNLOCKED: &str = "when-unlocked";

/// One keychain item: attributes plus the private key they guard.
#[derive(Serialize, Deserialize)]
struct KeychainRecord {
    application_tag: String,
    key_type: String,
    key_size_bits: u32,
    synchronizable: bool,
    accessible: String,
    private_key: String,
}

impl Drop for KeychainRecord {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Attribute-tagged keychain model. Items are found by (application tag, key
/// type, synchronizable); the public half is derived from the private key.
pub struct KeychainKeyStore<V: SecretVault> {
    vault: V,
    synchronizable: bool,
}

impl<V: SecretVault> KeychainKeyStore<V> {
    pub fn new(vault: V, scope: AccessScope) -> Self {
        Self {
            vault,
            synchronizable: scope.sync_across_devices,
        }
    }

    fn query(&self, name: &KeyName) -> String {
        format!("tag={name};type={KEY_TYPE_RSA};sync={}", self.synchronizable)
    }

    fn matches(&self, name: &KeyName, record: &KeychainRecord) -> bool {
        record.application_tag == name.as_str()
            && record.key_type == KEY_TYPE_RSA
            && record.synchronizable == self.synchronizable
    }

    fn load(&self, name: &KeyName) -> Result<Option<RsaPrivateHandle>, KeyStoreError> {
        let Some(raw) = self.vault.get(KEYCHAIN_SERVICE, &self.query(name))? else {
            debug!("no keychain item");
            return Ok(None);
        };
        let raw = Zeroizing::new(raw);
        let record: KeychainRecord =
            serde_json::from_str(&raw).map_err(|e| KeyStoreError::Decode(e.to_string()))?;

        if !self.matches(name, &record) {
            warn!("keychain item attributes do not match query");
            return Ok(None);
        }

        let handle = RsaPrivateHandle::decode(&record.private_key)?;
        let actual_bits = handle.key_size().map(|size| size.bits());
        if actual_bits != Some(record.key_size_bits) {
            return Err(KeyStoreError::Decode(format!(
                "key size attribute {} disagrees with stored key",
                record.key_size_bits
            )));
        }
        Ok(Some(handle))
    }
}

impl<V: SecretVault> KeyMaterialStore for KeychainKeyStore<V> {
    fn exists(&self, name: &KeyName) -> Result<bool, KeyStoreError> {
        Ok(self.fetch_private(name)?.is_some())
    }

    #[instrument(skip_all, fields(name = %name, bits = config.key_size.bits(), sync = self.synchronizable))]
    fn create(
        &self,
        name: &KeyName,
        config: &ProviderConfig,
    ) -> Result<KeyPairHandle, KeyStoreError> {
        if self.delete(name)? {
            info!("replaced existing keychain item");
        }

        let handle = RsaPrivateHandle::generate(config.key_size)?;
        let record = KeychainRecord {
            application_tag: name.to_string(),
            key_type: KEY_TYPE_RSA.to_string(),
            key_size_bits: config.key_size.bits(),
            synchronizable: self.synchronizable,
            accessible: ACCESSIBLE_WHEN_UNLOCKED.to_string(),
            private_key: handle.encode()?.to_string(),
        };
        let json = Zeroizing::new(
            serde_json::to_string(&record)
                .map_err(|e| KeyStoreError::Generation(e.to_string()))?,
        );

        self.vault.set(KEYCHAIN_SERVICE, &self.query(name), &json)?;
        info!("generated key pair");
        Ok(Arc::new(handle))
    }

    #[instrument(skip_all, fields(name = %name, sync = self.synchronizable))]
    fn fetch_private(&self, name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
        Ok(self
            .load(name)?
            .map(|handle| Arc::new(handle) as KeyPairHandle))
    }

    #[instrument(skip_all, fields(name = %name, sync = self.synchronizable))]
    fn fetch_public(&self, name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
        Ok(self
            .load(name)?
            .map(|handle| Arc::new(handle.public_handle()) as KeyPairHandle))
    }

    #[instrument(skip_all, fields(name = %name, sync = self.synchronizable))]
    fn delete(&self, name: &KeyName) -> Result<bool, KeyStoreError> {
        self.vault.remove(KEYCHAIN_SERVICE, &self.query(name))
    }
}
