//! Encryption provider over a key material store, the registry that owns
//! provider instances, and the secure cache boundary built on top.

pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod secure_cache;

pub use provider::KeyStoreEncryptionProvider;
pub use registry::ProviderRegistry;
pub use scheduler::Scheduler;
pub use secure_cache::{SecureCache, SecureCacheError};
