use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const KEY_NAME_SUFFIX: &str = "_securestore";
const DEFAULT_KEY_NAME: &str = "cacheseal_securestore";

/// PKCS#1 v1.5 encryption padding overhead in bytes.
pub const PKCS1_PADDING_OVERHEAD: usize = 11;

/// Errors produced by key material stores and key handles.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// The platform store (keyring, vault, lock) failed.
    #[error("key store backend error: {0}")]
    Backend(String),
    /// Persisted key material could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Key generation or encoding failed.
    #[error("generation error: {0}")]
    Generation(String),
    /// The cipher operation itself failed (padding, length, corrupted input).
    #[error("cipher error: {0}")]
    Cipher(String),
    /// The handle only carries the public half.
    #[error("private key not available on this handle")]
    MissingPrivateKey,
    #[error("unsupported key size: {0} bits")]
    UnsupportedKeySize(u32),
}

/// Stable, lower-cased identifier of a key pair inside a platform store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyName(String);

impl KeyName {
    /// Normalizes `raw`; blank names fall back to a fixed default.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Self(DEFAULT_KEY_NAME.to_string());
        }
        Self(raw.to_lowercase())
    }

    /// Key name for an application, e.g. `MyCache` -> `mycache_securestore`.
    pub fn for_application(app_name: &str) -> Self {
        let app_name = app_name.trim();
        if app_name.is_empty() {
            return Self::new("");
        }
        Self::new(format!("{app_name}{KEY_NAME_SUFFIX}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// RSA modulus sizes accepted by the platform stores.
///
/// Larger sizes take longer to generate and raise the per-call plaintext limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum KeySize {
    Bits512,
    Bits768,
    Bits1024,
    #[default]
    Bits2048,
    Bits3072,
    Bits4096,
}

impl KeySize {
    pub fn bits(self) -> u32 {
        match self {
            KeySize::Bits512 => 512,
            KeySize::Bits768 => 768,
            KeySize::Bits1024 => 1024,
            KeySize::Bits2048 => 2048,
            KeySize::Bits3072 => 3072,
            KeySize::Bits4096 => 4096,
        }
    }

    /// Modulus length in bytes; also the ciphertext length of one block.
    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Largest plaintext a single encrypt call accepts.
    pub fn max_plaintext_len(self) -> usize {
        self.bytes() - PKCS1_PADDING_OVERHEAD
    }
}

impl TryFrom<u32> for KeySize {
    type Error = KeyStoreError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            512 => Ok(KeySize::Bits512),
            768 => Ok(KeySize::Bits768),
            1024 => Ok(KeySize::Bits1024),
            2048 => Ok(KeySize::Bits2048),
            3072 => Ok(KeySize::Bits3072),
            4096 => Ok(KeySize::Bits4096),
            other => Err(KeyStoreError::UnsupportedKeySize(other)),
        }
    }
}

impl From<KeySize> for u32 {
    fn from(size: KeySize) -> Self {
        size.bits()
    }
}

/// Who may use the key and where it lives. Bound when a store is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessScope {
    /// Share across all users of the device instead of the current user only.
    pub shared_across_users: bool,
    /// Let the platform sync the key across the user's devices.
    pub sync_across_devices: bool,
}

/// Parameters used when a provider has to create its key pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub key_size: KeySize,
    pub scope: AccessScope,
}

/// What a handle can be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Encrypt only.
    Public,
    /// Encrypt and decrypt.
    Private,
    /// Opaque system-managed protection context; no caller-visible key.
    SystemManaged,
}

/// Opaque reference to key material owned by a platform store.
///
/// Implementations never expose raw key bytes, and their `Debug` output must not
/// print key material.
pub trait KeyHandle: Send + Sync + fmt::Debug {
    fn kind(&self) -> HandleKind;

    /// Modulus size for RSA handles; `None` for system-managed contexts.
    fn key_size(&self) -> Option<KeySize>;

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, KeyStoreError>;

    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, KeyStoreError>;
}

pub type KeyPairHandle = Arc<dyn KeyHandle>;

/// Named, persistent, access-controlled store of one key pair per [`KeyName`].
///
/// `create` and `delete` mutate process-wide state and must not race for the
/// same name; callers serialize them (see the provider registry).
pub trait KeyMaterialStore: Send + Sync {
    /// True iff an entry is registered under `name`. Side-effect free.
    fn exists(&self, name: &KeyName) -> Result<bool, KeyStoreError>;

    /// Replace any entry under `name` with a freshly generated key pair.
    ///
    /// Ciphertext produced under the previous pair becomes undecryptable.
    fn create(&self, name: &KeyName, config: &ProviderConfig)
        -> Result<KeyPairHandle, KeyStoreError>;

    /// Handle usable for decryption, or `None` when nothing is stored.
    fn fetch_private(&self, name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError>;

    /// Handle usable for encryption, or `None` when nothing is stored.
    fn fetch_public(&self, name: &KeyName) -> Result<Option<KeyPairHandle>, KeyStoreError>;

    /// Remove the entry; `false` when there was nothing to remove.
    fn delete(&self, name: &KeyName) -> Result<bool, KeyStoreError>;
}
