//! Save request body.

use crate::error::ProtocolResult;
use entcache_core::{AutoGeneratedKey, EntityState, MetadataStore, SaveEntry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Options sent alongside the entities of a save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOptions {
    /// Named save endpoint, when the service exposes more than one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    /// Opaque value passed through to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<JsonValue>,
}

impl SaveOptions {
    /// Sets the save endpoint name.
    #[must_use]
    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    /// Sets the tag.
    #[must_use]
    pub fn with_tag(mut self, tag: JsonValue) -> Self {
        self.tag = Some(tag);
        self
    }
}

/// How the server should fill in the key of an Added entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoGeneratedKeyPayload {
    /// Key property name.
    pub property_name: String,
    /// `Identity` or `KeyGenerator`.
    pub auto_generated_key_type: String,
}

/// Change tracking information attached to each saved entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAspectPayload {
    /// Entity type name.
    pub entity_type_name: String,
    /// State at the time the save started.
    pub entity_state: EntityState,
    /// Original values of the changed properties (Modified entities).
    #[serde(default)]
    pub original_values_map: Map<String, JsonValue>,
    /// Key generation info for Added entities with a generated key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_generated_key: Option<AutoGeneratedKeyPayload>,
}

/// One entity of a save bundle: its property values plus `entityAspect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntity {
    /// Data property values.
    #[serde(flatten)]
    pub values: Map<String, JsonValue>,
    /// Change tracking information.
    #[serde(rename = "entityAspect")]
    pub entity_aspect: EntityAspectPayload,
}

/// Body of a save request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveBundle {
    /// Entities to save, in the order they were tracked.
    pub entities: Vec<BundleEntity>,
    /// Save options.
    #[serde(default)]
    pub save_options: SaveOptions,
}

impl SaveBundle {
    /// Builds a bundle from save snapshots.
    pub fn from_entries(
        entries: &[SaveEntry],
        metadata: &MetadataStore,
        save_options: SaveOptions,
    ) -> ProtocolResult<Self> {
        let mut entities = Vec::with_capacity(entries.len());
        for entry in entries {
            let entity_type = metadata.entity_type(&entry.entity_type)?;

            let values = entry
                .values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect();
            let original_values_map = if entry.state == EntityState::Modified {
                entry
                    .original_values
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect()
            } else {
                Map::new()
            };
            let auto_generated_key = match (entry.state, entity_type.auto_generated_key) {
                (
                    EntityState::Added,
                    AutoGeneratedKey::Identity | AutoGeneratedKey::KeyGenerator,
                ) => {
                    entity_type.key_names.first().map(|name| AutoGeneratedKeyPayload {
                        property_name: name.clone(),
                        auto_generated_key_type: format!("{:?}", entity_type.auto_generated_key),
                    })
                }
                _ => None,
            };

            entities.push(BundleEntity {
                values,
                entity_aspect: EntityAspectPayload {
                    entity_type_name: entity_type.name.clone(),
                    entity_state: entry.state,
                    original_values_map,
                    auto_generated_key,
                },
            });
        }
        Ok(Self {
            entities,
            save_options,
        })
    }

    /// Number of entities in the bundle.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the bundle holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Serializes to the JSON request body.
    pub fn to_json(&self) -> ProtocolResult<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    /// Reads a request body.
    pub fn from_json(body: &JsonValue) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(body.clone())?)
    }
}
