//! Change tracking: pending changes, accept, reject, validation errors.

use super::EntityCache;
use crate::change_feed::ChangeKind;
use crate::entity::EntityState;
use crate::error::CacheResult;
use crate::metadata::MetadataStore;
use crate::types::EntityHandle;
use crate::validation::{validate_values, ValidationError, ValidationKind};
use crate::value::Value;
use std::sync::Arc;
use tracing::debug;

impl EntityCache {
    /// Returns true if any entity is Added, Modified or Deleted.
    ///
    /// Constant time; backed by a counter maintained on every transition.
    pub fn has_changes(&self) -> bool {
        self.dirty_count > 0
    }

    /// Handles of entities with pending changes, in insertion order,
    /// optionally restricted to one entity type.
    pub fn get_changes(&self, entity_type: Option<&str>) -> Vec<EntityHandle> {
        let entity_type = entity_type.map(MetadataStore::normalize_type_name);
        self.entities
            .values()
            .filter(|e| e.state().is_dirty())
            .filter(|e| entity_type.map_or(true, |t| e.entity_type == t))
            .map(|e| e.handle)
            .collect()
    }

    /// Rolls back the pending changes of one entity.
    ///
    /// Modified and Deleted entities get their original values back and
    /// become Unchanged. Added entities are detached.
    pub fn reject_entity_changes(&mut self, handle: EntityHandle) -> CacheResult<()> {
        self.tracked(handle, "reject changes")?;
        self.reject_tracked(handle);
        Ok(())
    }

    /// Rolls back every pending change and returns the affected handles.
    pub fn reject_changes(&mut self) -> Vec<EntityHandle> {
        let changed = self.get_changes(None);
        for handle in &changed {
            self.reject_tracked(*handle);
        }
        if !changed.is_empty() {
            debug!("Rejected changes on {} entities", changed.len());
        }
        changed
    }

    /// Makes the current values of one entity its clean state.
    ///
    /// Added and Modified entities become Unchanged; Deleted entities are
    /// detached.
    pub fn accept_entity_changes(&mut self, handle: EntityHandle) -> CacheResult<()> {
        self.tracked(handle, "accept changes")?;
        self.accept_tracked(handle);
        Ok(())
    }

    /// Accepts every pending change and returns the affected handles.
    pub fn accept_changes(&mut self) -> Vec<EntityHandle> {
        let changed = self.get_changes(None);
        for handle in &changed {
            self.accept_tracked(*handle);
        }
        changed
    }

    pub(super) fn reject_tracked(&mut self, handle: EntityHandle) {
        let Some(entity) = self.entities.get(&handle) else {
            return;
        };
        match entity.state() {
            EntityState::Added => {
                self.feed.emit(ChangeKind::Rejected { entity: handle });
                self.remove_entity(handle);
            }
            EntityState::Modified | EntityState::Deleted => {
                let metadata = Arc::clone(&self.metadata);
                let Ok(entity_type) = metadata.entity_type(&entity.entity_type) else {
                    return;
                };
                let originals = entity.aspect.original_values.clone();

                self.unlink_navigations(handle, entity_type);
                let mut restored = Vec::new();
                if let Some(entity) = self.entities.get_mut(&handle) {
                    for (property, original) in originals {
                        let current = entity
                            .values
                            .insert(property.clone(), original.clone())
                            .unwrap_or(Value::Null);
                        if current != original {
                            restored.push((property, current, original));
                        }
                    }
                    entity.aspect.reset_tracking();
                    entity.aspect.validation_errors.clear();
                }
                self.link_navigations(handle, entity_type);

                for (property, old_value, new_value) in restored {
                    self.feed.emit(ChangeKind::PropertyChanged {
                        entity: handle,
                        property,
                        old_value,
                        new_value,
                    });
                }
                self.transition(handle, EntityState::Unchanged);
                self.feed.emit(ChangeKind::Rejected { entity: handle });
            }
            EntityState::Unchanged | EntityState::Detached => {}
        }
    }

    pub(super) fn accept_tracked(&mut self, handle: EntityHandle) {
        let Some(entity) = self.entities.get_mut(&handle) else {
            return;
        };
        match entity.aspect.state {
            EntityState::Added | EntityState::Modified => {
                entity.aspect.reset_tracking();
                self.transition(handle, EntityState::Unchanged);
                self.feed.emit(ChangeKind::Accepted { entity: handle });
            }
            EntityState::Deleted => {
                self.feed.emit(ChangeKind::Accepted { entity: handle });
                self.remove_entity(handle);
            }
            EntityState::Unchanged | EntityState::Detached => {}
        }
    }

    /// Validation errors currently recorded on an entity.
    pub fn get_validation_errors(&self, handle: EntityHandle) -> Vec<ValidationError> {
        self.entities
            .get(&handle)
            .map(|e| e.aspect.validation_errors.clone())
            .unwrap_or_default()
    }

    /// Records a validation error on an entity.
    pub fn add_validation_error(
        &mut self,
        handle: EntityHandle,
        error: ValidationError,
    ) -> CacheResult<()> {
        self.tracked(handle, "add validation error")?;
        if let Some(entity) = self.entities.get_mut(&handle) {
            entity.aspect.validation_errors.push(error);
        }
        Ok(())
    }

    /// Removes every validation error from an entity.
    pub fn clear_validation_errors(&mut self, handle: EntityHandle) -> CacheResult<()> {
        self.tracked(handle, "clear validation errors")?;
        if let Some(entity) = self.entities.get_mut(&handle) {
            entity.aspect.validation_errors.clear();
        }
        Ok(())
    }

    /// Runs client-side validation on an entity.
    ///
    /// Replaces earlier client-side errors; server and custom errors are
    /// kept. Returns true if the entity passed.
    pub fn validate_entity(&mut self, handle: EntityHandle) -> CacheResult<bool> {
        let entity = self.tracked(handle, "validate")?;
        let metadata = Arc::clone(&self.metadata);
        let entity_type = metadata.entity_type(&entity.entity_type)?;
        let errors = validate_values(
            entity_type,
            &entity.key,
            &entity.values,
            entity.aspect.has_temp_key,
        );
        let passed = errors.is_empty();
        if let Some(entity) = self.entities.get_mut(&handle) {
            entity
                .aspect
                .validation_errors
                .retain(|e| matches!(e.kind, ValidationKind::Server | ValidationKind::Custom));
            entity.aspect.validation_errors.extend(errors);
        }
        Ok(passed)
    }
}
