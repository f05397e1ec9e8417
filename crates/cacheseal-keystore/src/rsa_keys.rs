//! RSA key handles (PKCS#1 v1.5, one block per call) and their at-rest encoding.

use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use cacheseal_core::{HandleKind, KeyHandle, KeySize, KeyStoreError};
use rand::rngs::OsRng;
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    traits::PublicKeyParts,
    Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
};
use zeroize::Zeroizing;

/// Encrypt-only half of a key pair.
#[derive(Clone)]
pub struct RsaPublicHandle {
    key: RsaPublicKey,
    size: KeySize,
}

/// Private half; can also encrypt under its derived public key.
#[derive(Clone)]
pub struct RsaPrivateHandle {
    key: RsaPrivateKey,
    public: RsaPublicHandle,
}

impl RsaPublicHandle {
    fn from_key(key: RsaPublicKey) -> Result<Self, KeyStoreError> {
        let size = size_of(&key)?;
        Ok(Self { key, size })
    }

    /// SPKI DER, base64.
    pub fn encode(&self) -> Result<String, KeyStoreError> {
        let der = self
            .key
            .to_public_key_der()
            .map_err(|e| KeyStoreError::Generation(format!("public key encode: {e}")))?;
        Ok(general_purpose::STANDARD.encode(der.as_bytes()))
    }

    pub fn decode(encoded: &str) -> Result<Self, KeyStoreError> {
        let der = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| KeyStoreError::Decode(e.to_string()))?;
        let key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| KeyStoreError::Decode(format!("public key: {e}")))?;
        Self::from_key(key)
    }
}

impl RsaPrivateHandle {
    pub fn generate(size: KeySize) -> Result<Self, KeyStoreError> {
        let key = RsaPrivateKey::new(&mut OsRng, size.bits() as usize)
            .map_err(|e| KeyStoreError::Generation(e.to_string()))?;
        Self::from_key(key)
    }

    fn from_key(key: RsaPrivateKey) -> Result<Self, KeyStoreError> {
        let public = RsaPublicHandle::from_key(key.to_public_key())?;
        Ok(Self { key, public })
    }

    pub fn public_handle(&self) -> RsaPublicHandle {
        self.public.clone()
    }

    /// PKCS#8 DER, base64. The returned string is wiped on drop.
    pub fn encode(&self) -> Result<Zeroizing<String>, KeyStoreError> {
        let der = self
            .key
            .to_pkcs8_der()
            .map_err(|e| KeyStoreError::Generation(format!("private key encode: {e}")))?;
        Ok(Zeroizing::new(
            general_purpose::STANDARD.encode(der.as_bytes()),
        ))
    }

    pub fn decode(encoded: &str) -> Result<Self, KeyStoreError> {
        let der = Zeroizing::new(
            general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| KeyStoreError::Decode(e.to_string()))?,
        );
        let key = RsaPrivateKey::from_pkcs8_der(&der)
            .map_err(|e| KeyStoreError::Decode(format!("private key: {e}")))?;
        Self::from_key(key)
    }
}

fn size_of(key: &RsaPublicKey) -> Result<KeySize, KeyStoreError> {
    let bits = u32::try_from(key.size() * 8).unwrap_or(u32::MAX);
    KeySize::try_from(bits)
}

impl KeyHandle for RsaPublicHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::Public
    }

    fn key_size(&self) -> Option<KeySize> {
        Some(self.size)
    }

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        self.key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, plain)
            .map_err(|e| KeyStoreError::Cipher(format!("encrypt: {e}")))
    }

    fn decrypt(&self, _cipher: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        Err(KeyStoreError::MissingPrivateKey)
    }
}

impl KeyHandle for RsaPrivateHandle {
    fn kind(&self) -> HandleKind {
        HandleKind::Private
    }

    fn key_size(&self) -> Option<KeySize> {
        Some(self.public.size)
    }

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        self.public.encrypt(plain)
    }

    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        self.key
            .decrypt(Pkcs1v15Encrypt, cipher)
            .map_err(|e| KeyStoreError::Cipher(format!("decrypt: {e}")))
    }
}

impl fmt::Debug for RsaPublicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPublicHandle")
            .field("bits", &self.size.bits())
            .finish()
    }
}

impl fmt::Debug for RsaPrivateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPrivateHandle")
            .field("bits", &self.public.size.bits())
            .finish_non_exhaustive()
    }
}
