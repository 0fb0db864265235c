//! Cache side of a save round trip.
//!
//! A save snapshots the pending entities into [`SaveEntry`] values before
//! the request goes out. When the response arrives, key mappings are
//! applied first and then each entry is completed against the server's
//! values. Properties written while the request was in flight survive.

use super::EntityCache;
use crate::change_feed::{ChangeKind, MergeSource};
use crate::entity::{EntityKey, EntityState};
use crate::error::{CacheError, CacheResult};
use crate::types::EntityHandle;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Snapshot of one pending entity taken when a save starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveEntry {
    /// Entity handle.
    pub handle: EntityHandle,
    /// Key at snapshot time (may be temporary).
    pub key: EntityKey,
    /// Entity type name.
    pub entity_type: String,
    /// State at snapshot time.
    pub state: EntityState,
    /// Current values at snapshot time.
    pub values: BTreeMap<String, Value>,
    /// Original values of the changed properties.
    pub original_values: BTreeMap<String, Value>,
    /// Write version at snapshot time.
    pub version: u64,
    /// Whether the key was a client placeholder.
    pub has_temp_key: bool,
}

impl EntityCache {
    /// Snapshots pending entities for a save.
    ///
    /// With `None`, every pending entity is included. Explicitly listed
    /// entities without pending changes are skipped. Entries are in
    /// insertion order.
    pub fn prepare_save(&self, handles: Option<&[EntityHandle]>) -> CacheResult<Vec<SaveEntry>> {
        let mut selected = match handles {
            Some(handles) => {
                for handle in handles {
                    self.tracked(*handle, "save")?;
                }
                handles.to_vec()
            }
            None => self.get_changes(None),
        };
        selected.sort_unstable();
        selected.dedup();

        Ok(selected
            .into_iter()
            .filter_map(|handle| self.entities.get(&handle))
            .filter(|e| e.state().is_dirty())
            .map(|e| SaveEntry {
                handle: e.handle,
                key: e.key.clone(),
                entity_type: e.entity_type.clone(),
                state: e.state(),
                values: e.values.clone(),
                original_values: e.aspect.original_values.clone(),
                version: e.aspect.version,
                has_temp_key: e.aspect.has_temp_key,
            })
            .collect())
    }

    /// Replaces a temporary key with the server-assigned one.
    ///
    /// Updates the identity map, the entity's key properties and every
    /// foreign key that referenced the temporary key. Returns `None` if no
    /// tracked entity holds `temp`.
    ///
    /// A query can merge the saved row before the mapping arrives. That
    /// copy is detached if it is Unchanged and the saved entity takes its
    /// place. A dirty copy is left alone and the mapping fails with
    /// [`CacheError::DuplicateKey`].
    pub fn apply_key_mapping(
        &mut self,
        temp: &EntityKey,
        real: &EntityKey,
    ) -> CacheResult<Option<EntityHandle>> {
        let Some(handle) = self.identity.get(temp) else {
            return Ok(None);
        };
        let metadata = Arc::clone(&self.metadata);
        let entity_type = metadata.entity_type(temp.entity_type())?;
        if real.entity_type() != entity_type.name
            || real.values().len() != entity_type.key_names.len()
        {
            return Err(CacheError::invalid_operation(format!(
                "key mapping {temp} -> {real} does not match the key of {}",
                entity_type.name
            )));
        }
        if temp == real {
            if let Some(entity) = self.entities.get_mut(&handle) {
                entity.aspect.has_temp_key = false;
            }
            return Ok(Some(handle));
        }

        if let Some(existing) = self.identity.get(real).filter(|h| *h != handle) {
            if self.entity_state(existing).is_dirty() {
                return Err(CacheError::DuplicateKey {
                    key: real.clone(),
                    existing,
                });
            }
            debug!("Saved entity {handle} replaces {existing} under {real}");
            self.remove_entity(existing);
        }
        self.identity.rekey(temp, real.clone())?;
        for (name, value) in entity_type.key_names.iter().zip(real.values()) {
            self.write_raw(handle, entity_type, name, value.to_value());
        }
        if let Some(entity) = self.entities.get_mut(&handle) {
            entity.key = real.clone();
            entity.aspect.has_temp_key = false;
        }
        self.rekey_references(temp, real);
        debug!("Mapped key {temp} -> {real}");
        self.feed.emit(ChangeKind::KeyChanged {
            entity: handle,
            old_key: temp.clone(),
            new_key: real.clone(),
        });
        Ok(Some(handle))
    }

    /// Settles one saved entity.
    ///
    /// Deleted entries are detached. Other entries take the server's values
    /// (when given) and become Unchanged, except for properties written
    /// after the snapshot: those keep their local value, use the saved
    /// value as their new original, and leave the entity Modified.
    pub fn complete_save(
        &mut self,
        entry: &SaveEntry,
        server_values: Option<&BTreeMap<String, Value>>,
    ) -> CacheResult<()> {
        let handle = entry.handle;
        let Some(entity) = self.entities.get(&handle) else {
            return Ok(());
        };
        if entry.state == EntityState::Deleted {
            self.feed.emit(ChangeKind::Accepted { entity: handle });
            self.remove_entity(handle);
            return Ok(());
        }

        let metadata = Arc::clone(&self.metadata);
        let entity_type = metadata.entity_type(&entity.entity_type)?;
        let current_state = entity.state();
        let written_after: Vec<String> = entity
            .aspect
            .write_versions
            .iter()
            .filter(|(_, version)| **version > entry.version)
            .map(|(property, _)| property.clone())
            .collect();

        if let Some(server_values) = server_values {
            for (property, value) in server_values {
                if entity_type.is_key_property(property) || written_after.contains(property) {
                    continue;
                }
                self.write_raw(handle, entity_type, property, value.clone());
            }
        }

        if let Some(entity) = self.entities.get_mut(&handle) {
            let originals = written_after
                .iter()
                .map(|property| {
                    let saved = server_values
                        .and_then(|values| values.get(property))
                        .or_else(|| entry.values.get(property))
                        .cloned()
                        .unwrap_or(Value::Null);
                    (property.clone(), saved)
                })
                .collect();
            entity.aspect.original_values = originals;
            entity
                .aspect
                .write_versions
                .retain(|_, version| *version > entry.version);
            entity.aspect.has_temp_key = false;
            entity.aspect.validation_errors.clear();
        }

        let next_state = if current_state == EntityState::Deleted {
            EntityState::Deleted
        } else if written_after.is_empty() {
            EntityState::Unchanged
        } else {
            EntityState::Modified
        };
        self.transition(handle, next_state);
        self.feed.emit(ChangeKind::Merged {
            entity: handle,
            source: MergeSource::Save,
        });
        Ok(())
    }
}
