use std::sync::Arc;

use cacheseal_core::{KeyMaterialStore, KeyName};
use cacheseal_keystore::{open_store, KeyringVault};
use cacheseal_provider::{KeyStoreEncryptionProvider, ProviderRegistry, Scheduler};
use color_eyre::Result;
use tracing::debug;

use crate::config::Config;

/// Open the configured key store over the OS keychain.
pub fn production_store(config: &Config) -> Arc<dyn KeyMaterialStore> {
    debug!(backend = ?config.backend, "opening key store");
    open_store(config.backend, KeyringVault::new(), config.provider.scope)
}

/// Resolve the provider for the configured key name through the global registry.
pub fn provider(
    config: &Config,
    store: &dyn KeyMaterialStore,
) -> Result<Arc<KeyStoreEncryptionProvider>> {
    provider_in(ProviderRegistry::global(), config, store)
}

pub fn provider_in(
    registry: &ProviderRegistry,
    config: &Config,
    store: &dyn KeyMaterialStore,
) -> Result<Arc<KeyStoreEncryptionProvider>> {
    let name: KeyName = config.key_name();
    registry
        .get_or_init(&name, || {
            KeyStoreEncryptionProvider::new(
                store,
                name.clone(),
                &config.provider,
                Scheduler::current()?,
            )
        })
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))
}

/// Helper for tests to open a store over an in-memory vault.
#[cfg(test)]
pub fn test_store(config: &Config) -> Arc<dyn KeyMaterialStore> {
    open_store(
        config.backend,
        cacheseal_keystore::InMemoryVault::new(),
        config.provider.scope,
    )
}
