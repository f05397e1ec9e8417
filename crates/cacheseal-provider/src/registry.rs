use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use cacheseal_core::{KeyMaterialStore, KeyName, ProviderConfig, ProviderError};
use tracing::{debug, info, instrument};

use crate::provider::KeyStoreEncryptionProvider;

type Memo = Option<Arc<KeyStoreEncryptionProvider>>;
type Slot = Arc<Mutex<Memo>>;

/// Memoizes one provider per [`KeyName`] and owns every key lifecycle change
/// for that name.
///
/// Construction, rotation and deletion for a given name run under that name's
/// lock, so key resolution never races with a create or delete on the store.
/// Different names do not block each other. Failed constructions are not
/// memoized and leave no slot behind.
///
/// Lock order is slot, then map. The map lock is never held while waiting on a
/// slot.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    slots: Mutex<HashMap<KeyName, Slot>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry, created on first use.
    pub fn global() -> &'static ProviderRegistry {
        static GLOBAL: OnceLock<ProviderRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ProviderRegistry::new)
    }

    fn slot(&self, name: &KeyName) -> Result<Slot, ProviderError> {
        let mut slots = self.slots.lock().map_err(poisoned)?;
        Ok(slots.entry(name.clone()).or_default().clone())
    }

    fn is_current(&self, name: &KeyName, slot: &Slot) -> Result<bool, ProviderError> {
        let slots = self.slots.lock().map_err(poisoned)?;
        Ok(slots
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, slot)))
    }

    fn forget(&self, name: &KeyName, slot: &Slot) -> Result<(), ProviderError> {
        let mut slots = self.slots.lock().map_err(poisoned)?;
        if slots
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(name);
        }
        Ok(())
    }

    /// Run `f` while holding the lock for `name`. A slot left empty afterwards
    /// is dropped from the map.
    fn with_slot<R>(
        &self,
        name: &KeyName,
        f: impl FnOnce(&mut Memo) -> Result<R, ProviderError>,
    ) -> Result<R, ProviderError> {
        loop {
            let slot = self.slot(name)?;
            let mut guard = slot.lock().map_err(poisoned)?;
            // The slot may have been dropped while we waited on it.
            if !self.is_current(name, &slot)? {
                continue;
            }
            let result = f(&mut *guard);
            if guard.is_none() {
                self.forget(name, &slot)?;
            }
            return result;
        }
    }

    /// Return the provider for `name`, running `init` if none is memoized yet.
    #[instrument(skip_all, fields(name = %name))]
    pub fn get_or_init<F>(
        &self,
        name: &KeyName,
        init: F,
    ) -> Result<Arc<KeyStoreEncryptionProvider>, ProviderError>
    where
        F: FnOnce() -> Result<KeyStoreEncryptionProvider, ProviderError>,
    {
        self.with_slot(name, |memo| {
            if let Some(existing) = memo.as_ref() {
                return Ok(existing.clone());
            }

            debug!("constructing provider");
            let provider = init()?;
            if provider.key_name() != name {
                return Err(ProviderError::Construction {
                    reason: format!(
                        "initializer built a provider for {} instead of {name}",
                        provider.key_name()
                    ),
                });
            }
            let provider = Arc::new(provider);
            *memo = Some(provider.clone());
            Ok(provider)
        })
    }

    /// Replace the key pair for `name` and forget the memoized provider.
    /// Returns whether a key pair existed before. Ciphertext produced under
    /// the old key no longer decrypts.
    #[instrument(skip_all, fields(name = %name))]
    pub fn rotate<S>(
        &self,
        name: &KeyName,
        store: &S,
        config: &ProviderConfig,
    ) -> Result<bool, ProviderError>
    where
        S: KeyMaterialStore + ?Sized,
    {
        self.with_slot(name, |memo| {
            let replaced = store.exists(name)?;
            store.create(name, config)?;
            memo.take();
            info!(replaced, bits = config.key_size.bits(), "key pair rotated");
            Ok(replaced)
        })
    }

    /// Delete the key pair for `name` and forget the memoized provider.
    /// Returns whether anything was deleted.
    #[instrument(skip_all, fields(name = %name))]
    pub fn delete_key<S>(&self, name: &KeyName, store: &S) -> Result<bool, ProviderError>
    where
        S: KeyMaterialStore + ?Sized,
    {
        self.with_slot(name, |memo| {
            let deleted = store.delete(name)?;
            memo.take();
            debug!(deleted, "key pair deleted");
            Ok(deleted)
        })
    }

    pub fn get(&self, name: &KeyName) -> Option<Arc<KeyStoreEncryptionProvider>> {
        let slot = self.slots.lock().ok()?.get(name)?.clone();
        let guard = slot.lock().ok()?;
        guard.clone()
    }

    /// Forget the memoized provider. Callers still holding the old `Arc` keep
    /// using the old handles.
    pub fn remove(&self, name: &KeyName) -> Option<Arc<KeyStoreEncryptionProvider>> {
        self.with_slot(name, |memo| Ok(memo.take())).ok().flatten()
    }

    /// Number of memoized providers. Slots busy with a construction or a
    /// lifecycle change are not counted.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = match self.slots.lock() {
            Ok(slots) => slots.values().cloned().collect(),
            Err(_) => return 0,
        };
        slots
            .iter()
            .filter(|slot| slot.try_lock().map(|memo| memo.is_some()).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or_default()
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> ProviderError {
    ProviderError::Construction {
        reason: format!("registry lock poisoned: {err}"),
    }
}
