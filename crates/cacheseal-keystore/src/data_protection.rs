use std::{
    fmt,
    sync::{Arc, Mutex},
};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use cacheseal_core::{
    AccessScope, HandleKind, KeyHandle, KeyMaterialStore, KeyName, KeyPairHandle, KeySize,
    KeyStoreError, ProviderConfig,
};
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::vault::SecretVault;

pub const DATA_PROTECTION_SERVICE: &str = "cacheseal.dataprotection";

const TAG_BYTE_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SECRET_LEN: usize = 32;

/// Protection scope a context is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionDescriptor {
    LocalUser,
    LocalMachine,
}

impl ProtectionDescriptor {
    pub fn from_scope(scope: AccessScope) -> Self {
        if scope.shared_across_users {
            ProtectionDescriptor::LocalMachine
        } else {
            ProtectionDescriptor::LocalUser
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtectionDescriptor::LocalUser => "LOCAL=user",
            ProtectionDescriptor::LocalMachine => "LOCAL=machine",
        }
    }

    fn tag(self) -> u8 {
        match self {
            ProtectionDescriptor::LocalUser => 1,
            ProtectionDescriptor::LocalMachine => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, KeyStoreError> {
        match tag {
            1 => Ok(ProtectionDescriptor::LocalUser),
            2 => Ok(ProtectionDescriptor::LocalMachine),
            other => Err(KeyStoreError::Cipher(format!(
                "unknown protection descriptor tag {other}"
            ))),
        }
    }
}

/// System-managed protection context. The secret behind it is provisioned and
/// held by the service; callers only get protect/unprotect.
///
/// Output format: `descriptor[1] || nonce[12] || ciphertext || tag[16]`.
/// Protection uses the context's own descriptor; unprotection uses whichever
/// descriptor the block records, so blocks stay readable after the scope of
/// the store changes.
pub struct ProtectionContext<V: SecretVault> {
    vault: V,
    descriptor: ProtectionDescriptor,
    provisioning: Mutex<()>,
}

impl<V: SecretVault> ProtectionContext<V> {
    fn cipher(&self, secret: &[u8]) -> Result<Aes256Gcm, KeyStoreError> {
        Aes256Gcm::new_from_slice(secret)
            .map_err(|e| KeyStoreError::Cipher(format!("cipher init failed: {e}")))
    }

    fn load_secret(
        &self,
        descriptor: ProtectionDescriptor,
    ) -> Result<Option<Zeroizing<Vec<u8>>>, KeyStoreError> {
        let Some(encoded) = self.vault.get(DATA_PROTECTION_SERVICE, descriptor.as_str())? else {
            return Ok(None);
        };
        let encoded = Zeroizing::new(encoded);
        let bytes = Zeroizing::new(
            general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| KeyStoreError::Decode(e.to_string()))?,
        );
        if bytes.len() != SECRET_LEN {
            return Err(KeyStoreError::Decode(format!(
                "expected {SECRET_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Some(bytes))
    }

    /// Secret for this context's descriptor, provisioned on first use.
    fn provisioned_secret(&self) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let _guard = self
            .provisioning
            .lock()
            .map_err(|err| KeyStoreError::Backend(format!("lock poisoned: {err}")))?;
        if let Some(bytes) = self.load_secret(self.descriptor)? {
            return Ok(bytes);
        }

        let account = self.descriptor.as_str();
        let mut bytes = Zeroizing::new(vec![0u8; SECRET_LEN]);
        OsRng.fill_bytes(&mut bytes);
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(&bytes[..]));
        self.vault.set(DATA_PROTECTION_SERVICE, account, &encoded)?;
        info!(descriptor = account, "provisioned protection secret");
        Ok(bytes)
    }
}

impl<V: SecretVault> KeyHandle for ProtectionContext<V> {
    fn kind(&self) -> HandleKind {
        HandleKind::SystemManaged
    }

    fn key_size(&self) -> Option<KeySize> {
        None
    }

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        let secret = self.provisioned_secret()?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher(&secret)?
            .encrypt(Nonce::from_slice(&nonce_bytes), plain)
            .map_err(|e| KeyStoreError::Cipher(format!("protect failed: {e}")))?;

        let mut out = Vec::with_capacity(TAG_BYTE_LEN + NONCE_LEN + ciphertext.len());
        out.push(self.descriptor.tag());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, protected: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        if protected.len() < TAG_BYTE_LEN + NONCE_LEN + TAG_LEN {
            return Err(KeyStoreError::Cipher(
                "protected block too short (need descriptor[1] + nonce[12] + tag[16])".into(),
            ));
        }
        let descriptor = ProtectionDescriptor::from_tag(protected[0])?;
        let (nonce, body) = protected[TAG_BYTE_LEN..].split_at(NONCE_LEN);
        let secret = self.load_secret(descriptor)?.ok_or_else(|| {
            KeyStoreError::Cipher(format!(
                "no protection secret provisioned for {}",
                descriptor.as_str()
            ))
        })?;
        if descriptor != self.descriptor {
            debug!(
                recorded = descriptor.as_str(),
                current = self.descriptor.as_str(),
                "unprotecting block from another scope"
            );
        }
        self.cipher(&secret)?
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|e| KeyStoreError::Cipher(format!("unprotect failed: {e}")))
    }
}

impl<V: SecretVault> fmt::Debug for ProtectionContext<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectionContext")
            .field("descriptor", &self.descriptor.as_str())
            .finish_non_exhaustive()
    }
}

/// Data-protection service model: no caller-visible key pair. Existence is
/// always true, lifecycle calls are no-ops, and every fetch yields the same
/// system-managed context.
pub struct DataProtectionStore<V: SecretVault + 'static> {
    context: Arc<ProtectionContext<V>>,
}

impl<V: SecretVault + 'static> DataProtectionStore<V> {
    pub fn new(vault: V, scope: AccessScope) -> Self {
        Self {
            context: Arc::new(ProtectionContext {
                vault,
                descriptor: ProtectionDescriptor::from_scope(scope),
                provisioning: Mutex::new(()),
            }),
        }
    }

    pub fn descriptor(&self) -> ProtectionDescriptor {
        self.context.descriptor
    }

    fn handle(&self) -> KeyPairHandle {
        self.context.clone()
    }
}

impl<V: SecretVault + 'static> KeyMaterialStore for DataProtectionStore<V> {
    fn exists(&self, _name: &KeyName) -> Result<bool, KeyStoreError> {
        Ok(true)
    }

    fn create(
        &self,
        name: &KeyName,
        _config: &ProviderConfig,
    ) -> Result<KeyPairHandle, KeyStoreError> {
        debug!(name = %name, "protection context is system-managed; nothing to create");
        Ok(self.handle())
    }

    fn fetch_private(&self, _name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
        Ok(Some(self.handle()))
    }

    fn fetch_public(&self, _name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError> {
        Ok(Some(self.handle()))
    }

    fn delete(&self, name: &KeyName) -> Result<bool, KeyStoreError> {
        debug!(name = %name, "protection context is system-managed; nothing to delete");
        Ok(false)
    }
}
