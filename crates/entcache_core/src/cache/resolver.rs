//! Navigation properties.
//!
//! A scalar navigation is read from the child's foreign key values; a
//! collection is read from the navigation index. Setting a navigation
//! writes foreign keys through the tracked write path, so the two sides
//! cannot drift apart.

use super::{foreign_key_target, EntityCache};
use crate::entity::EntityState;
use crate::error::{CacheError, CacheResult};
use crate::metadata::{EntityType, NavigationProperty};
use crate::types::EntityHandle;
use crate::value::Value;
use std::sync::Arc;

impl EntityCache {
    /// Sets a scalar navigation, writing the child's foreign keys.
    ///
    /// `None` clears the reference by nulling the foreign keys. The child
    /// joins or leaves the parent's inverse collection as a consequence.
    pub fn set_navigation(
        &mut self,
        child: EntityHandle,
        navigation: &str,
        parent: Option<EntityHandle>,
    ) -> CacheResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let entity = self.tracked(child, "set navigation")?;
        let state = entity.state();
        let child_type = metadata.entity_type(&entity.entity_type)?;
        let nav = scalar_navigation(child_type, navigation)?;

        let new_values: Vec<Value> = match parent {
            Some(parent) => {
                let parent_entity = self.tracked(parent, "reference")?;
                if parent_entity.entity_type != nav.target_type {
                    return Err(CacheError::invalid_operation(format!(
                        "{}.{} expects {}, got {}",
                        child_type.name, nav.name, nav.target_type, parent_entity.entity_type
                    )));
                }
                parent_entity.key.values().iter().map(|v| v.to_value()).collect()
            }
            None => vec![Value::Null; nav.foreign_key_names.len()],
        };

        if !state.accepts_writes() {
            return Err(CacheError::invalid_state(
                child,
                state,
                format!("set {navigation}"),
            ));
        }
        if state != EntityState::Added
            && nav
                .foreign_key_names
                .iter()
                .zip(&new_values)
                .any(|(fk, v)| child_type.is_key_property(fk) && entity.get(fk) != v)
        {
            return Err(CacheError::invalid_state(
                child,
                state,
                format!("change key through {navigation}"),
            ));
        }

        for (fk, value) in nav.foreign_key_names.iter().zip(new_values) {
            self.set_value(child, fk, value)?;
        }
        Ok(())
    }

    /// Entity a scalar navigation points at, if it is tracked.
    pub fn get_navigation(
        &self,
        child: EntityHandle,
        navigation: &str,
    ) -> CacheResult<Option<EntityHandle>> {
        let entity = self.tracked(child, "read navigation")?;
        let child_type = self.metadata.entity_type(&entity.entity_type)?;
        let nav = scalar_navigation(child_type, navigation)?;
        Ok(foreign_key_target(nav, &entity.values).and_then(|key| self.identity.get(&key)))
    }

    /// Entities in a collection navigation, in insertion order.
    ///
    /// Deleted children are excluded.
    pub fn get_collection(
        &self,
        parent: EntityHandle,
        navigation: &str,
    ) -> CacheResult<Vec<EntityHandle>> {
        let entity = self.tracked(parent, "read collection")?;
        let parent_type = self.metadata.entity_type(&entity.entity_type)?;
        let (nav, inverse) = self.collection_navigation(parent_type, navigation)?;
        Ok(self
            .navigation
            .children(&entity.key, &nav.target_type, &inverse.name)
            .into_iter()
            .filter(|h| {
                self.entities
                    .get(h)
                    .is_some_and(|e| e.state() != EntityState::Deleted)
            })
            .collect())
    }

    /// Adds `child` to a collection by pointing its inverse navigation at `parent`.
    pub fn add_to_collection(
        &mut self,
        parent: EntityHandle,
        navigation: &str,
        child: EntityHandle,
    ) -> CacheResult<()> {
        let inverse = self.inverse_for(parent, navigation, child)?;
        self.set_navigation(child, &inverse, Some(parent))
    }

    /// Removes `child` from a collection by nulling its foreign keys.
    ///
    /// Fails with [`CacheError::InvalidOperation`] if `child` is not a
    /// member of the collection.
    pub fn remove_from_collection(
        &mut self,
        parent: EntityHandle,
        navigation: &str,
        child: EntityHandle,
    ) -> CacheResult<()> {
        let inverse = self.inverse_for(parent, navigation, child)?;
        if !self.get_collection(parent, navigation)?.contains(&child) {
            return Err(CacheError::invalid_operation(format!(
                "{child} is not in {navigation} of {parent}"
            )));
        }
        self.set_navigation(child, &inverse, None)
    }

    fn inverse_for(
        &self,
        parent: EntityHandle,
        navigation: &str,
        child: EntityHandle,
    ) -> CacheResult<String> {
        let parent_entity = self.tracked(parent, "modify collection")?;
        let parent_type = self.metadata.entity_type(&parent_entity.entity_type)?;
        let (nav, inverse) = self.collection_navigation(parent_type, navigation)?;
        let child_entity = self.tracked(child, "modify collection")?;
        if child_entity.entity_type != nav.target_type {
            return Err(CacheError::invalid_operation(format!(
                "{}.{} holds {}, got {}",
                parent_type.name, nav.name, nav.target_type, child_entity.entity_type
            )));
        }
        Ok(inverse.name.clone())
    }

    fn collection_navigation<'a>(
        &'a self,
        parent_type: &'a EntityType,
        navigation: &str,
    ) -> CacheResult<(&'a NavigationProperty, &'a NavigationProperty)> {
        let nav = parent_type
            .navigation(navigation)
            .ok_or_else(|| CacheError::unknown_property(&parent_type.name, navigation))?;
        if nav.is_scalar {
            return Err(CacheError::invalid_operation(format!(
                "{}.{navigation} is not a collection",
                parent_type.name
            )));
        }
        let inverse = self.metadata.inverse_of(nav).ok_or_else(|| {
            CacheError::invalid_metadata(format!(
                "{}.{navigation} has no inverse",
                parent_type.name
            ))
        })?;
        Ok((nav, inverse))
    }
}

fn scalar_navigation<'a>(
    entity_type: &'a EntityType,
    navigation: &str,
) -> CacheResult<&'a NavigationProperty> {
    let nav = entity_type
        .navigation(navigation)
        .ok_or_else(|| CacheError::unknown_property(&entity_type.name, navigation))?;
    if !nav.is_scalar {
        return Err(CacheError::invalid_operation(format!(
            "{}.{navigation} is a collection",
            entity_type.name
        )));
    }
    Ok(nav)
}
