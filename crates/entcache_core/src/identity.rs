//! Identity map.
//!
//! Guarantees at most one tracked entity per [`EntityKey`]. Every lookup by
//! key, whether from a query merge, a save response or the caller, goes
//! through this map so the same key always yields the same handle.

use crate::entity::EntityKey;
use crate::error::{CacheError, CacheResult};
use crate::types::EntityHandle;
use crate::value::KeyValue;
use std::collections::HashMap;

/// Map from entity key to the handle that owns it.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    entries: HashMap<EntityKey, EntityHandle>,
}

impl IdentityMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` as the owner of `key`.
    ///
    /// Registering the same pair twice is a no-op. Fails with
    /// [`CacheError::DuplicateKey`] if another handle owns the key.
    pub fn register(&mut self, key: EntityKey, handle: EntityHandle) -> CacheResult<()> {
        match self.entries.get(&key) {
            Some(existing) if *existing != handle => Err(CacheError::DuplicateKey {
                key,
                existing: *existing,
            }),
            Some(_) => Ok(()),
            None => {
                self.entries.insert(key, handle);
                Ok(())
            }
        }
    }

    /// Looks up an entity by type name and key values.
    pub fn resolve(&self, entity_type: &str, values: &[KeyValue]) -> Option<EntityHandle> {
        self.get(&EntityKey::new(entity_type, values.to_vec()))
    }

    /// Looks up an entity by key.
    pub fn get(&self, key: &EntityKey) -> Option<EntityHandle> {
        self.entries.get(key).copied()
    }

    /// Returns true if some entity owns `key`.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes a key, returning the handle that owned it.
    pub fn remove(&mut self, key: &EntityKey) -> Option<EntityHandle> {
        self.entries.remove(key)
    }

    /// Moves the owner of `old` to `new`.
    ///
    /// Fails with [`CacheError::DuplicateKey`] if a different entity
    /// already owns `new`, in which case the map is unchanged.
    pub fn rekey(&mut self, old: &EntityKey, new: EntityKey) -> CacheResult<EntityHandle> {
        let handle = self
            .get(old)
            .ok_or_else(|| CacheError::invalid_operation(format!("{old} is not tracked")))?;
        if let Some(existing) = self.get(&new) {
            if existing != handle {
                return Err(CacheError::DuplicateKey { key: new, existing });
            }
        }
        self.entries.remove(old);
        self.entries.insert(new, handle);
        Ok(handle)
    }

    /// Keys of a given entity type.
    pub fn keys_of_type<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> impl Iterator<Item = &'a EntityKey> + 'a {
        self.entries
            .keys()
            .filter(move |k| k.entity_type() == entity_type)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
