//! Parsing server payloads into merge batches.
//!
//! A payload is fully parsed and checked against metadata before anything
//! touches the cache, so a malformed response never leaves a half-merged
//! graph behind.

use crate::entity::EntityKey;
use crate::error::{CacheError, CacheResult};
use crate::metadata::{EntityType, MetadataStore};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};

/// How incoming server values combine with entities already in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Unchanged entities take server values; entities with pending
    /// changes keep their local values.
    #[default]
    PreserveChanges,
    /// Server values replace local ones and the entity becomes Unchanged.
    OverwriteChanges,
    /// Existing entities are left alone; only new keys are attached.
    SkipMerge,
}

/// Data property values of one entity as sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    /// Entity type name.
    pub entity_type: String,
    /// Key built from the key property values.
    pub key: EntityKey,
    /// Data property values present in the payload.
    pub values: BTreeMap<String, Value>,
}

impl EntitySnapshot {
    /// Reads the data properties of a single node, ignoring nested navigations.
    pub fn from_node(
        metadata: &MetadataStore,
        expected_type: Option<&str>,
        node: &JsonValue,
    ) -> CacheResult<Self> {
        let object = as_object(node)?;
        let entity_type = metadata.entity_type(node_type(object, expected_type)?)?;
        Self::from_object(entity_type, object)
    }

    fn from_object(entity_type: &EntityType, object: &Map<String, JsonValue>) -> CacheResult<Self> {
        let mut values = BTreeMap::new();
        for property in &entity_type.data_properties {
            let Some(json) = field(object, &property.name) else {
                continue;
            };
            let value = Value::from_json(json, property.data_type).ok_or_else(|| {
                CacheError::TypeMismatch {
                    entity_type: entity_type.name.clone(),
                    property: property.name.clone(),
                    expected: property.data_type,
                    found: json_kind(json).to_string(),
                }
            })?;
            values.insert(property.name.clone(), value);
        }

        let mut key_values = Vec::with_capacity(entity_type.key_names.len());
        for name in &entity_type.key_names {
            let key_value = values
                .get(name)
                .and_then(Value::to_key_value)
                .ok_or_else(|| CacheError::MissingKey {
                    entity_type: entity_type.name.clone(),
                    property: name.clone(),
                })?;
            key_values.push(key_value);
        }

        Ok(Self {
            entity_type: entity_type.name.clone(),
            key: EntityKey::new(entity_type.name.clone(), key_values),
            values,
        })
    }
}

/// A parsed payload: every entity in it, nested ones included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeBatch {
    snapshots: Vec<EntitySnapshot>,
    roots: Vec<usize>,
}

impl MergeBatch {
    /// Parses top-level result nodes.
    ///
    /// Each node may carry `$type` (a server type name, normalised against
    /// the catalog); otherwise `default_type` applies. `$id`/`$ref` markers
    /// let a node refer to one seen earlier in the payload. Expanded
    /// navigation properties hold nested nodes and are parsed recursively.
    pub fn parse(
        metadata: &MetadataStore,
        default_type: Option<&str>,
        nodes: &[JsonValue],
    ) -> CacheResult<Self> {
        let mut parser = Parser {
            metadata,
            snapshots: Vec::new(),
            ids: HashMap::new(),
        };
        let mut roots = Vec::with_capacity(nodes.len());
        for node in nodes {
            roots.push(parser.node(default_type, node)?);
        }
        Ok(Self {
            snapshots: parser.snapshots,
            roots,
        })
    }

    /// Every entity in the payload, in document order.
    pub fn snapshots(&self) -> &[EntitySnapshot] {
        &self.snapshots
    }

    /// Index into [`snapshots`](Self::snapshots) for each top-level node.
    pub fn root_indexes(&self) -> &[usize] {
        &self.roots
    }

    /// Top-level entities, in result order.
    pub fn roots(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.roots.iter().map(|i| &self.snapshots[*i])
    }

    /// Number of entities, nested ones included.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Returns true if the payload held no entities.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

struct Parser<'a> {
    metadata: &'a MetadataStore,
    snapshots: Vec<EntitySnapshot>,
    ids: HashMap<String, usize>,
}

impl Parser<'_> {
    fn node(&mut self, expected_type: Option<&str>, node: &JsonValue) -> CacheResult<usize> {
        let object = as_object(node)?;
        if let Some(reference) = object.get("$ref") {
            let id = marker(reference);
            return self.ids.get(&id).copied().ok_or_else(|| {
                CacheError::invalid_operation(format!("unresolved $ref {id} in payload"))
            });
        }

        let metadata = self.metadata;
        let entity_type = metadata.entity_type(node_type(object, expected_type)?)?;
        let snapshot = EntitySnapshot::from_object(entity_type, object)?;
        let index = self.snapshots.len();
        self.snapshots.push(snapshot);
        if let Some(id) = object.get("$id") {
            self.ids.insert(marker(id), index);
        }

        for navigation in &entity_type.navigation_properties {
            let Some(related) = field(object, &navigation.name) else {
                continue;
            };
            if related.is_null() {
                continue;
            }
            if navigation.is_scalar {
                self.node(Some(&navigation.target_type), related)?;
            } else {
                let items = related.as_array().ok_or_else(|| {
                    CacheError::invalid_operation(format!(
                        "{}.{} must be an array",
                        entity_type.name, navigation.name
                    ))
                })?;
                for item in items {
                    self.node(Some(&navigation.target_type), item)?;
                }
            }
        }
        Ok(index)
    }
}

fn as_object(node: &JsonValue) -> CacheResult<&Map<String, JsonValue>> {
    node.as_object().ok_or_else(|| {
        CacheError::invalid_operation(format!(
            "entity node must be an object, got {}",
            json_kind(node)
        ))
    })
}

fn node_type<'a>(
    object: &'a Map<String, JsonValue>,
    expected: Option<&'a str>,
) -> CacheResult<&'a str> {
    object
        .get("$type")
        .and_then(JsonValue::as_str)
        .map(MetadataStore::normalize_type_name)
        .or(expected)
        .ok_or_else(|| {
            CacheError::invalid_operation("entity node has no $type and no default type")
        })
}

/// Reads a property by its exact name or its lower camel case form.
fn field<'a>(object: &'a Map<String, JsonValue>, name: &str) -> Option<&'a JsonValue> {
    object.get(name).or_else(|| {
        let mut chars = name.chars();
        let first = chars.next()?;
        let camel: String = first.to_lowercase().chain(chars).collect();
        object.get(&camel)
    })
}

fn marker(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
