//! Catalog of entity types.

use super::entity_type::{AutoGeneratedKey, EntityType, NavigationProperty};
use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// JSON shape of a metadata document.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataDocument {
    entity_types: Vec<EntityType>,
}

/// The set of entity types a cache works with.
///
/// Metadata is supplied by the server once per session (or built in code)
/// and is immutable after validation. Share it through an `Arc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    types: BTreeMap<String, EntityType>,
}

impl MetadataStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity type. Fails if the name is already registered.
    pub fn add_entity_type(&mut self, entity_type: EntityType) -> CacheResult<()> {
        if self.types.contains_key(&entity_type.name) {
            return Err(CacheError::invalid_metadata(format!(
                "entity type {} registered twice",
                entity_type.name
            )));
        }
        self.types.insert(entity_type.name.clone(), entity_type);
        Ok(())
    }

    /// Adds an entity type (builder form).
    pub fn with_entity_type(mut self, entity_type: EntityType) -> CacheResult<Self> {
        self.add_entity_type(entity_type)?;
        Ok(self)
    }

    /// Looks up an entity type, failing if it is unknown.
    pub fn entity_type(&self, name: &str) -> CacheResult<&EntityType> {
        self.types
            .get(name)
            .or_else(|| self.types.get(Self::normalize_type_name(name)))
            .ok_or_else(|| CacheError::unknown_type(name))
    }

    /// Looks up an entity type.
    pub fn get(&self, name: &str) -> Option<&EntityType> {
        self.entity_type(name).ok()
    }

    /// Finds the entity type queried through `resource`.
    pub fn type_for_resource(&self, resource: &str) -> Option<&EntityType> {
        self.types
            .values()
            .find(|t| t.resource_name() == resource)
    }

    /// All entity types, ordered by name.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.types.values()
    }

    /// Number of entity types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if the store has no types.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Reduces a server type name to the short name used in the catalog.
    ///
    /// `"Northwind.Models.Customer, Northwind"` becomes `"Customer"`, and
    /// `"Customer:#Northwind.Models"` becomes `"Customer"`.
    pub fn normalize_type_name(name: &str) -> &str {
        let name = name.split(',').next().unwrap_or(name).trim();
        let name = name.split(":#").next().unwrap_or(name);
        name.rsplit('.').next().unwrap_or(name)
    }

    /// Returns the navigation on the target type paired with `navigation`.
    pub fn inverse_of(&self, navigation: &NavigationProperty) -> Option<&NavigationProperty> {
        let inverse = navigation.inverse.as_deref()?;
        self.get(&navigation.target_type)?.navigation(inverse)
    }

    /// Checks the catalog for internal consistency.
    ///
    /// Every key property must exist with a key-compatible type. Scalar
    /// navigations must declare one foreign key per target key property,
    /// with compatible types. Collection navigations must name an inverse
    /// scalar navigation on the target that points back at this type.
    pub fn validate(&self) -> CacheResult<()> {
        for entity_type in self.types.values() {
            self.validate_type(entity_type)?;
        }
        Ok(())
    }

    fn validate_type(&self, entity_type: &EntityType) -> CacheResult<()> {
        let name = &entity_type.name;
        if entity_type.key_names.is_empty() {
            return Err(CacheError::invalid_metadata(format!("{name} has no key")));
        }

        let mut seen = HashSet::new();
        for property in &entity_type.data_properties {
            if !seen.insert(property.name.as_str()) {
                return Err(CacheError::invalid_metadata(format!(
                    "{name}.{} declared twice",
                    property.name
                )));
            }
        }
        for navigation in &entity_type.navigation_properties {
            if !seen.insert(navigation.name.as_str()) {
                return Err(CacheError::invalid_metadata(format!(
                    "{name}.{} declared twice",
                    navigation.name
                )));
            }
        }

        for key in &entity_type.key_names {
            let property = entity_type.data_property(key).ok_or_else(|| {
                CacheError::invalid_metadata(format!("{name} key {key} is not a data property"))
            })?;
            if !property.data_type.is_key_compatible() {
                return Err(CacheError::invalid_metadata(format!(
                    "{name} key {key} has non-key type {:?}",
                    property.data_type
                )));
            }
        }

        if entity_type.auto_generated_key != AutoGeneratedKey::None
            && entity_type.key_names.len() != 1
        {
            return Err(CacheError::invalid_metadata(format!(
                "{name} generates keys but has a composite key"
            )));
        }

        for navigation in &entity_type.navigation_properties {
            if navigation.is_scalar {
                self.validate_scalar(entity_type, navigation)?;
            } else {
                self.validate_collection(entity_type, navigation)?;
            }
        }
        Ok(())
    }

    fn validate_scalar(
        &self,
        entity_type: &EntityType,
        navigation: &NavigationProperty,
    ) -> CacheResult<()> {
        let name = &entity_type.name;
        let nav = &navigation.name;
        let target = self.types.get(&navigation.target_type).ok_or_else(|| {
            CacheError::invalid_metadata(format!(
                "{name}.{nav} targets unknown type {}",
                navigation.target_type
            ))
        })?;

        if navigation.foreign_key_names.len() != target.key_names.len() {
            return Err(CacheError::invalid_metadata(format!(
                "{name}.{nav} has {} foreign keys but {} has {} key properties",
                navigation.foreign_key_names.len(),
                target.name,
                target.key_names.len()
            )));
        }

        for (fk, target_key) in navigation
            .foreign_key_names
            .iter()
            .zip(target.key_properties())
        {
            let property = entity_type.data_property(fk).ok_or_else(|| {
                CacheError::invalid_metadata(format!(
                    "{name}.{nav} foreign key {fk} is not a data property"
                ))
            })?;
            if !property.data_type.is_compatible_with(target_key.data_type) {
                return Err(CacheError::invalid_metadata(format!(
                    "{name}.{fk} ({:?}) cannot reference {}.{} ({:?})",
                    property.data_type, target.name, target_key.name, target_key.data_type
                )));
            }
        }

        if let Some(inverse) = &navigation.inverse {
            let inverse_nav = target.navigation(inverse).ok_or_else(|| {
                CacheError::invalid_metadata(format!(
                    "{name}.{nav} inverse {}.{inverse} does not exist",
                    target.name
                ))
            })?;
            if inverse_nav.is_scalar || inverse_nav.target_type != *name {
                return Err(CacheError::invalid_metadata(format!(
                    "{name}.{nav} inverse {}.{inverse} must be a collection of {name}",
                    target.name
                )));
            }
        }
        Ok(())
    }

    fn validate_collection(
        &self,
        entity_type: &EntityType,
        navigation: &NavigationProperty,
    ) -> CacheResult<()> {
        let name = &entity_type.name;
        let nav = &navigation.name;
        if !navigation.foreign_key_names.is_empty() {
            return Err(CacheError::invalid_metadata(format!(
                "{name}.{nav} is a collection and cannot own foreign keys"
            )));
        }
        let target = self.types.get(&navigation.target_type).ok_or_else(|| {
            CacheError::invalid_metadata(format!(
                "{name}.{nav} targets unknown type {}",
                navigation.target_type
            ))
        })?;
        let inverse = navigation.inverse.as_deref().ok_or_else(|| {
            CacheError::invalid_metadata(format!("{name}.{nav} is a collection without an inverse"))
        })?;
        let inverse_nav = target.navigation(inverse).ok_or_else(|| {
            CacheError::invalid_metadata(format!(
                "{name}.{nav} inverse {}.{inverse} does not exist",
                target.name
            ))
        })?;
        if !inverse_nav.is_scalar || inverse_nav.target_type != *name {
            return Err(CacheError::invalid_metadata(format!(
                "{name}.{nav} inverse {}.{inverse} must be a scalar reference to {name}",
                target.name
            )));
        }
        Ok(())
    }

    /// Reads and validates a metadata document.
    ///
    /// The document is `{ "entityTypes": [ ... ] }` with each entry in the
    /// serde shape of [`EntityType`].
    pub fn from_json(json: &str) -> CacheResult<Self> {
        let document: MetadataDocument = serde_json::from_str(json)
            .map_err(|e| CacheError::invalid_metadata(format!("malformed metadata: {e}")))?;
        Self::from_document(document)
    }

    /// Reads and validates an already parsed metadata document.
    pub fn from_value(value: serde_json::Value) -> CacheResult<Self> {
        let document: MetadataDocument = serde_json::from_value(value)
            .map_err(|e| CacheError::invalid_metadata(format!("malformed metadata: {e}")))?;
        Self::from_document(document)
    }

    fn from_document(document: MetadataDocument) -> CacheResult<Self> {
        let mut store = Self::new();
        for entity_type in document.entity_types {
            store.add_entity_type(entity_type)?;
        }
        store.validate()?;
        Ok(store)
    }

    /// Serializes the catalog as a metadata document.
    pub fn to_json(&self) -> CacheResult<String> {
        let document = MetadataDocument {
            entity_types: self.types.values().cloned().collect(),
        };
        serde_json::to_string_pretty(&document)
            .map_err(|e| CacheError::invalid_metadata(e.to_string()))
    }
}
