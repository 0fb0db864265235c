//! Per-entity tracking data.

use super::{EntityKey, EntityState};
use crate::types::EntityHandle;
use crate::validation::ValidationError;
use crate::value::Value;
use std::collections::BTreeMap;

/// Change-tracking bookkeeping attached to every tracked entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityAspect {
    /// Current state.
    pub state: EntityState,
    /// Values as of the last clean state, for properties written since.
    ///
    /// A property is snapshotted on its first write only, so this always
    /// holds the server value rather than an intermediate edit.
    pub original_values: BTreeMap<String, Value>,
    /// Validation errors from the client or the last save.
    pub validation_errors: Vec<ValidationError>,
    /// Incremented on every property write.
    pub version: u64,
    /// Version at which each property was last written.
    pub write_versions: BTreeMap<String, u64>,
    /// True while the key is a client-generated placeholder.
    pub has_temp_key: bool,
}

impl EntityAspect {
    /// Creates an aspect in the given state.
    pub fn new(state: EntityState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Returns true if `property` has been written since `version`.
    pub fn written_since(&self, property: &str, version: u64) -> bool {
        self.write_versions
            .get(property)
            .is_some_and(|v| *v > version)
    }

    /// Names of the properties with an original-value snapshot.
    pub fn changed_properties(&self) -> impl Iterator<Item = &str> {
        self.original_values.keys().map(String::as_str)
    }

    /// Drops the original-value snapshot and write history.
    pub(crate) fn reset_tracking(&mut self) {
        self.original_values.clear();
        self.write_versions.clear();
    }
}

/// An entity held by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    /// Slot handle.
    pub handle: EntityHandle,
    /// Entity type name.
    pub entity_type: String,
    /// Current key.
    pub key: EntityKey,
    /// Current data property values.
    pub values: BTreeMap<String, Value>,
    /// Tracking data.
    pub aspect: EntityAspect,
}

impl TrackedEntity {
    /// Current state.
    pub fn state(&self) -> EntityState {
        self.aspect.state
    }

    /// Value of a data property, `Null` if it was never set.
    pub fn get(&self, property: &str) -> &Value {
        self.values.get(property).unwrap_or(&Value::Null)
    }

    /// Original value of a property (the current one if it has not changed).
    pub fn original(&self, property: &str) -> &Value {
        self.aspect
            .original_values
            .get(property)
            .unwrap_or_else(|| self.get(property))
    }
}
