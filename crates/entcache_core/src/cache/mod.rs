//! The entity cache.
//!
//! [`EntityCache`] owns every tracked entity of one unit of work. Entities
//! live in slots addressed by [`EntityHandle`]; the identity map, the
//! navigation index and the dirty counter are kept in step with the slots
//! by every operation, and every operation either completes or leaves the
//! cache untouched.

mod local_query;
mod merge;
mod resolver;
mod save;
mod tracking;

pub use save::SaveEntry;

use crate::change_feed::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::config::CacheConfig;
use crate::entity::{EntityAspect, EntityKey, EntityState, TrackedEntity};
use crate::error::{CacheError, CacheResult};
use crate::identity::IdentityMap;
use crate::key_generator::KeyGenerator;
use crate::metadata::{AutoGeneratedKey, EntityType, MetadataStore, NavigationProperty};
use crate::navigation::NavigationIndex;
use crate::types::EntityHandle;
use crate::value::{KeyValue, Value};
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, warn};

/// Synchronous entity cache with identity map and change tracking.
#[derive(Debug)]
pub struct EntityCache {
    metadata: Arc<MetadataStore>,
    config: CacheConfig,
    entities: BTreeMap<EntityHandle, TrackedEntity>,
    identity: IdentityMap,
    navigation: NavigationIndex,
    key_generator: KeyGenerator,
    dirty_count: usize,
    next_handle: EntityHandle,
    feed: ChangeFeed,
}

impl EntityCache {
    /// Creates an empty cache over a metadata catalog.
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self::with_config(metadata, CacheConfig::default())
    }

    /// Creates an empty cache with explicit configuration.
    pub fn with_config(metadata: Arc<MetadataStore>, config: CacheConfig) -> Self {
        Self {
            metadata,
            key_generator: KeyGenerator::new(config.temp_key_seed),
            feed: ChangeFeed::bounded(config.max_event_history),
            config,
            entities: BTreeMap::new(),
            identity: IdentityMap::new(),
            navigation: NavigationIndex::new(),
            dirty_count: 0,
            next_handle: EntityHandle::new(1),
        }
    }

    /// The metadata catalog.
    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns true if `handle` refers to a tracked entity.
    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.entities.contains_key(&handle)
    }

    /// Looks up a tracked entity.
    pub fn entity(&self, handle: EntityHandle) -> Option<&TrackedEntity> {
        self.entities.get(&handle)
    }

    /// All tracked entities in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    /// Handles of the tracked entities of one type, in insertion order.
    pub fn entities_of_type(&self, entity_type: &str) -> Vec<EntityHandle> {
        let entity_type = MetadataStore::normalize_type_name(entity_type);
        self.entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| e.handle)
            .collect()
    }

    /// State of an entity; `Detached` for handles that are not tracked.
    pub fn entity_state(&self, handle: EntityHandle) -> EntityState {
        self.entities
            .get(&handle)
            .map_or(EntityState::Detached, TrackedEntity::state)
    }

    /// Current key of an entity.
    pub fn entity_key(&self, handle: EntityHandle) -> Option<&EntityKey> {
        self.entities.get(&handle).map(|e| &e.key)
    }

    /// Looks up an entity by type name and key values.
    pub fn resolve(&self, entity_type: &str, values: &[KeyValue]) -> Option<EntityHandle> {
        self.identity
            .resolve(MetadataStore::normalize_type_name(entity_type), values)
    }

    /// Looks up an entity by key.
    pub fn find_by_key(&self, key: &EntityKey) -> Option<EntityHandle> {
        self.identity.get(key)
    }

    /// The identity map.
    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity
    }

    /// Reads a data property.
    pub fn get_value(&self, handle: EntityHandle, property: &str) -> CacheResult<Value> {
        let entity = self.tracked(handle, "read")?;
        let entity_type = self.metadata.entity_type(&entity.entity_type)?;
        if entity_type.data_property(property).is_none() {
            return Err(CacheError::unknown_property(&entity_type.name, property));
        }
        Ok(entity.get(property).clone())
    }

    /// All current data property values of an entity.
    pub fn values(&self, handle: EntityHandle) -> Option<&BTreeMap<String, Value>> {
        self.entities.get(&handle).map(|e| &e.values)
    }

    /// Writes a data property through the change tracker.
    ///
    /// The first write to a property of an Unchanged or Modified entity
    /// snapshots its original value; an Unchanged entity becomes Modified.
    /// Writing the current value is a no-op. Foreign key writes update the
    /// navigation index in the same step.
    pub fn set_value(
        &mut self,
        handle: EntityHandle,
        property: &str,
        value: impl Into<Value>,
    ) -> CacheResult<()> {
        let value = value.into();
        let entity = self.tracked(handle, "set value")?;
        let state = entity.state();
        if !state.accepts_writes() {
            return Err(CacheError::invalid_state(handle, state, format!("set {property}")));
        }

        let metadata = Arc::clone(&self.metadata);
        let entity_type = metadata.entity_type(&entity.entity_type)?;
        let data_property = entity_type
            .data_property(property)
            .ok_or_else(|| CacheError::unknown_property(&entity_type.name, property))?;
        let found = value.kind();
        let value = value
            .coerce(data_property.data_type)
            .ok_or_else(|| CacheError::TypeMismatch {
                entity_type: entity_type.name.clone(),
                property: property.to_string(),
                expected: data_property.data_type,
                found: found.to_string(),
            })?;

        if *entity.get(property) == value {
            return Ok(());
        }

        if entity_type.is_key_property(property) {
            if state != EntityState::Added {
                return Err(CacheError::invalid_state(
                    handle,
                    state,
                    format!("change key property {property}"),
                ));
            }
            return self.change_key(handle, entity_type, property, value);
        }

        self.write_tracked(handle, entity_type, property, value);
        Ok(())
    }

    /// Creates a new entity in the Added state.
    ///
    /// Missing key values are generated when the type's keys are
    /// generated; otherwise the key must be supplied. Missing non-nullable
    /// properties take their type's default value.
    pub fn create_entity(
        &mut self,
        entity_type: &str,
        values: &[(&str, Value)],
    ) -> CacheResult<EntityHandle> {
        let metadata = Arc::clone(&self.metadata);
        let entity_type = metadata.entity_type(entity_type)?;
        let mut values = build_values(entity_type, values)?;

        let mut has_temp_key = false;
        let key = match key_from_values(entity_type, &values) {
            Ok(key) => key,
            Err(err) => {
                if entity_type.auto_generated_key == AutoGeneratedKey::None
                    || entity_type.key_names.len() != 1
                {
                    return Err(err);
                }
                let key_property = entity_type
                    .key_properties()
                    .next()
                    .ok_or_else(|| err.clone())?;
                let identity = &self.identity;
                let type_name = &entity_type.name;
                let generated = self.key_generator.generate(key_property.data_type, |candidate| {
                    identity.contains(&EntityKey::new(type_name.clone(), vec![candidate.clone()]))
                })?;
                values.insert(key_property.name.clone(), generated.to_value());
                has_temp_key = true;
                EntityKey::new(entity_type.name.clone(), vec![generated])
            }
        };

        for property in &entity_type.data_properties {
            values.entry(property.name.clone()).or_insert_with(|| {
                if property.is_nullable {
                    Value::Null
                } else {
                    Value::default_for(property.data_type)
                }
            });
        }

        self.insert_entity(entity_type, key, values, EntityState::Added, has_temp_key)
    }

    /// Starts tracking an existing entity, Unchanged unless `state` says otherwise.
    pub fn attach_entity(
        &mut self,
        entity_type: &str,
        values: &[(&str, Value)],
        state: EntityState,
    ) -> CacheResult<EntityHandle> {
        if state == EntityState::Detached {
            return Err(CacheError::invalid_operation(
                "cannot attach an entity in the Detached state",
            ));
        }
        let metadata = Arc::clone(&self.metadata);
        let entity_type = metadata.entity_type(entity_type)?;
        let mut values = build_values(entity_type, values)?;
        let key = key_from_values(entity_type, &values)?;
        for property in &entity_type.data_properties {
            values.entry(property.name.clone()).or_insert(Value::Null);
        }
        self.insert_entity(entity_type, key, values, state, false)
    }

    /// Marks an entity for deletion.
    ///
    /// An Added entity never reached the server and is detached instead.
    pub fn delete_entity(&mut self, handle: EntityHandle) -> CacheResult<()> {
        let state = self.tracked(handle, "delete")?.state();
        match state {
            EntityState::Added => {
                self.remove_entity(handle);
            }
            EntityState::Unchanged | EntityState::Modified => {
                self.transition(handle, EntityState::Deleted);
            }
            EntityState::Deleted | EntityState::Detached => {}
        }
        Ok(())
    }

    /// Stops tracking an entity. Pending changes on it are dropped.
    pub fn detach(&mut self, handle: EntityHandle) -> CacheResult<()> {
        self.tracked(handle, "detach")?;
        self.remove_entity(handle);
        Ok(())
    }

    /// Detaches every entity.
    pub fn clear(&mut self) {
        let was_dirty = self.dirty_count > 0;
        let count = self.entities.len();
        self.entities.clear();
        self.identity.clear();
        self.navigation.clear();
        self.dirty_count = 0;
        debug!("Cleared {count} entities");
        self.feed.emit(ChangeKind::Cleared);
        if was_dirty {
            self.feed
                .emit(ChangeKind::HasChangesChanged { has_changes: false });
        }
    }

    /// Subscribes to change events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// The change feed.
    pub fn change_feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn tracked(&self, handle: EntityHandle, operation: &str) -> CacheResult<&TrackedEntity> {
        self.entities
            .get(&handle)
            .ok_or_else(|| self.missing(handle, operation))
    }

    fn missing(&self, handle: EntityHandle, operation: &str) -> CacheError {
        if handle.as_u64() > 0 && handle < self.next_handle {
            CacheError::invalid_state(handle, EntityState::Detached, operation)
        } else {
            CacheError::EntityNotFound(handle)
        }
    }

    fn insert_entity(
        &mut self,
        entity_type: &EntityType,
        key: EntityKey,
        values: BTreeMap<String, Value>,
        state: EntityState,
        has_temp_key: bool,
    ) -> CacheResult<EntityHandle> {
        let handle = self.next_handle;
        self.identity.register(key.clone(), handle)?;
        self.next_handle = handle.next();

        let mut aspect = EntityAspect::new(state);
        aspect.has_temp_key = has_temp_key;
        self.entities.insert(
            handle,
            TrackedEntity {
                handle,
                entity_type: entity_type.name.clone(),
                key: key.clone(),
                values,
                aspect,
            },
        );
        self.link_navigations(handle, entity_type);
        debug!("Attached {key} as {handle} ({state})");
        self.feed.emit(ChangeKind::Attached {
            entity: handle,
            key,
            state,
        });
        self.adjust_dirty(false, state.is_dirty());
        Ok(handle)
    }

    fn remove_entity(&mut self, handle: EntityHandle) -> Option<TrackedEntity> {
        let type_name = self.entities.get(&handle)?.entity_type.clone();
        let metadata = Arc::clone(&self.metadata);
        if let Ok(entity_type) = metadata.entity_type(&type_name) {
            self.unlink_navigations(handle, entity_type);
        }
        let entity = self.entities.remove(&handle)?;
        self.identity.remove(&entity.key);
        debug!("Detached {} ({})", entity.key, handle);
        self.feed.emit(ChangeKind::Detached {
            entity: handle,
            key: entity.key.clone(),
        });
        self.adjust_dirty(entity.state().is_dirty(), false);
        Some(entity)
    }

    fn transition(&mut self, handle: EntityHandle, to: EntityState) {
        let Some(entity) = self.entities.get_mut(&handle) else {
            return;
        };
        let from = entity.aspect.state;
        if from == to {
            return;
        }
        entity.aspect.state = to;
        debug!("{handle} {from} -> {to}");
        self.feed.emit(ChangeKind::StateChanged {
            entity: handle,
            from,
            to,
        });
        self.adjust_dirty(from.is_dirty(), to.is_dirty());
    }

    fn adjust_dirty(&mut self, was_dirty: bool, is_dirty: bool) {
        if was_dirty == is_dirty {
            return;
        }
        let before = self.dirty_count > 0;
        if is_dirty {
            self.dirty_count += 1;
        } else {
            self.dirty_count = self.dirty_count.saturating_sub(1);
        }
        let after = self.dirty_count > 0;
        if before != after {
            self.feed
                .emit(ChangeKind::HasChangesChanged { has_changes: after });
        }
    }

    /// Tracked property write. The caller has validated state and type.
    fn write_tracked(
        &mut self,
        handle: EntityHandle,
        entity_type: &EntityType,
        property: &str,
        value: Value,
    ) {
        let is_foreign_key = entity_type
            .navigations_for_foreign_key(property)
            .next()
            .is_some();
        if is_foreign_key {
            self.unlink_navigations(handle, entity_type);
        }

        let Some(entity) = self.entities.get_mut(&handle) else {
            return;
        };
        let state = entity.aspect.state;
        let old_value = entity
            .values
            .insert(property.to_string(), value.clone())
            .unwrap_or(Value::Null);
        if matches!(state, EntityState::Unchanged | EntityState::Modified) {
            entity
                .aspect
                .original_values
                .entry(property.to_string())
                .or_insert_with(|| old_value.clone());
        }
        entity.aspect.version += 1;
        let version = entity.aspect.version;
        entity
            .aspect
            .write_versions
            .insert(property.to_string(), version);

        if is_foreign_key {
            self.link_navigations(handle, entity_type);
        }
        self.feed.emit(ChangeKind::PropertyChanged {
            entity: handle,
            property: property.to_string(),
            old_value,
            new_value: value,
        });
        if state == EntityState::Unchanged {
            self.transition(handle, EntityState::Modified);
        }
    }

    /// Untracked property write used for server values and key fix-ups.
    fn write_raw(
        &mut self,
        handle: EntityHandle,
        entity_type: &EntityType,
        property: &str,
        value: Value,
    ) -> Option<Value> {
        let is_foreign_key = entity_type
            .navigations_for_foreign_key(property)
            .next()
            .is_some();
        if is_foreign_key {
            self.unlink_navigations(handle, entity_type);
        }
        let old = self
            .entities
            .get_mut(&handle)
            .and_then(|e| e.values.insert(property.to_string(), value));
        if is_foreign_key {
            self.link_navigations(handle, entity_type);
        }
        old
    }

    fn change_key(
        &mut self,
        handle: EntityHandle,
        entity_type: &EntityType,
        property: &str,
        value: Value,
    ) -> CacheResult<()> {
        let missing = || CacheError::MissingKey {
            entity_type: entity_type.name.clone(),
            property: property.to_string(),
        };
        let key_value = value.to_key_value().ok_or_else(missing)?;
        let old_key = self.tracked(handle, "change key")?.key.clone();
        let position = entity_type
            .key_names
            .iter()
            .position(|k| k == property)
            .ok_or_else(missing)?;
        let mut parts = old_key.values().to_vec();
        if position >= parts.len() {
            return Err(missing());
        }
        parts[position] = key_value;
        let new_key = EntityKey::new(entity_type.name.clone(), parts);

        self.identity.rekey(&old_key, new_key.clone())?;
        self.write_tracked(handle, entity_type, property, value);
        if let Some(entity) = self.entities.get_mut(&handle) {
            entity.key = new_key.clone();
            entity.aspect.has_temp_key = false;
        }
        self.rekey_references(&old_key, &new_key);
        self.feed.emit(ChangeKind::KeyChanged {
            entity: handle,
            old_key,
            new_key,
        });
        Ok(())
    }

    /// Points every reference to `old` at `new`, rewriting the referencing
    /// foreign keys. Dependents whose key includes such a foreign key are
    /// rekeyed in turn.
    fn rekey_references(&mut self, old: &EntityKey, new: &EntityKey) {
        let moved = self.navigation.rekey_target(old, new);
        let metadata = Arc::clone(&self.metadata);
        let mut dependents = Vec::new();

        for ((child_type, navigation_name), children) in moved {
            let Some(child_type) = metadata.get(&child_type) else {
                continue;
            };
            let Some(navigation) = child_type.navigation(&navigation_name) else {
                continue;
            };
            let key_dependent = navigation
                .foreign_key_names
                .iter()
                .any(|fk| child_type.is_key_property(fk));
            for child in children {
                let Some(entity) = self.entities.get_mut(&child) else {
                    continue;
                };
                for (fk, value) in navigation.foreign_key_names.iter().zip(new.values()) {
                    entity.values.insert(fk.clone(), value.to_value());
                }
                if key_dependent {
                    if let Ok(new_child_key) = key_from_values(child_type, &entity.values) {
                        dependents.push((child, entity.key.clone(), new_child_key));
                    }
                }
            }
        }

        for (child, old_key, new_key) in dependents {
            if old_key == new_key {
                continue;
            }
            match self.identity.rekey(&old_key, new_key.clone()) {
                Ok(_) => {
                    if let Some(entity) = self.entities.get_mut(&child) {
                        entity.key = new_key.clone();
                    }
                    debug!("Remapped dependent key {old_key} -> {new_key}");
                    self.feed.emit(ChangeKind::KeyChanged {
                        entity: child,
                        old_key: old_key.clone(),
                        new_key: new_key.clone(),
                    });
                    self.rekey_references(&old_key, &new_key);
                }
                Err(err) => warn!("Could not remap dependent key {old_key}: {err}"),
            }
        }
    }

    fn link_navigations(&mut self, handle: EntityHandle, entity_type: &EntityType) {
        let Some(entity) = self.entities.get(&handle) else {
            return;
        };
        let links: Vec<_> = entity_type
            .scalar_navigations()
            .filter_map(|nav| foreign_key_target(nav, &entity.values).map(|key| (nav, key)))
            .collect();
        for (navigation, target) in links {
            self.navigation
                .link(&entity_type.name, &navigation.name, target, handle);
        }
    }

    fn unlink_navigations(&mut self, handle: EntityHandle, entity_type: &EntityType) {
        let Some(entity) = self.entities.get(&handle) else {
            return;
        };
        let links: Vec<_> = entity_type
            .scalar_navigations()
            .filter_map(|nav| foreign_key_target(nav, &entity.values).map(|key| (nav, key)))
            .collect();
        for (navigation, target) in links {
            self.navigation
                .unlink(&entity_type.name, &navigation.name, &target, handle);
        }
    }
}

/// Checks caller-supplied values against metadata.
fn build_values(
    entity_type: &EntityType,
    values: &[(&str, Value)],
) -> CacheResult<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for (name, value) in values {
        let property = entity_type
            .data_property(name)
            .ok_or_else(|| CacheError::unknown_property(&entity_type.name, *name))?;
        let coerced = value
            .clone()
            .coerce(property.data_type)
            .ok_or_else(|| CacheError::TypeMismatch {
                entity_type: entity_type.name.clone(),
                property: property.name.clone(),
                expected: property.data_type,
                found: value.kind().to_string(),
            })?;
        out.insert(property.name.clone(), coerced);
    }
    Ok(out)
}

/// Builds the key of an entity from its key property values.
fn key_from_values(
    entity_type: &EntityType,
    values: &BTreeMap<String, Value>,
) -> CacheResult<EntityKey> {
    let mut parts = Vec::with_capacity(entity_type.key_names.len());
    for name in &entity_type.key_names {
        let part = values
            .get(name)
            .and_then(Value::to_key_value)
            .ok_or_else(|| CacheError::MissingKey {
                entity_type: entity_type.name.clone(),
                property: name.clone(),
            })?;
        parts.push(part);
    }
    Ok(EntityKey::new(entity_type.name.clone(), parts))
}

/// Key of the entity a scalar navigation points at, if every foreign key is set.
fn foreign_key_target(
    navigation: &NavigationProperty,
    values: &BTreeMap<String, Value>,
) -> Option<EntityKey> {
    if navigation.foreign_key_names.is_empty() {
        return None;
    }
    let parts = navigation
        .foreign_key_names
        .iter()
        .map(|fk| values.get(fk).and_then(Value::to_key_value))
        .collect::<Option<Vec<_>>>()?;
    Some(EntityKey::new(navigation.target_type.clone(), parts))
}

#[cfg(test)]
mod tests;
