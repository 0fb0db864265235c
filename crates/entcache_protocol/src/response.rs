//! Query and save responses.

use crate::error::{ProtocolError, ProtocolResult};
use entcache_core::{EntityKey, KeyValue, MetadataStore};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Body of a query response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Entity nodes, in result order.
    pub results: Vec<JsonValue>,
    /// Total row count before paging, when requested.
    pub inline_count: Option<u64>,
}

/// Reads a query response.
///
/// Accepts a bare array of entity nodes or an object of the form
/// `{ "results": [...], "inlineCount": n }`.
pub fn parse_query_response(body: &JsonValue) -> ProtocolResult<QueryResponse> {
    match body {
        JsonValue::Array(items) => Ok(QueryResponse {
            results: items.clone(),
            inline_count: None,
        }),
        JsonValue::Object(object) => {
            let results = object
                .get("results")
                .or_else(|| object.get("Results"))
                .and_then(JsonValue::as_array)
                .ok_or_else(|| {
                    ProtocolError::invalid_structure("query response has no results array")
                })?;
            let inline_count = object
                .get("inlineCount")
                .or_else(|| object.get("InlineCount"))
                .and_then(JsonValue::as_u64);
            Ok(QueryResponse {
                results: results.clone(),
                inline_count,
            })
        }
        JsonValue::Null => Ok(QueryResponse::default()),
        other => Err(ProtocolError::invalid_structure(format!(
            "query response must be an array or object, got {other}"
        ))),
    }
}

/// Server-assigned key for an entity saved with a temporary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMapping {
    /// Entity type name, possibly namespace-qualified.
    #[serde(alias = "EntityTypeName")]
    pub entity_type_name: String,
    /// Temporary key value (an array for composite keys).
    #[serde(alias = "tempKey", alias = "TempValue")]
    pub temp_value: JsonValue,
    /// Real key value (an array for composite keys).
    #[serde(alias = "realKey", alias = "RealValue")]
    pub real_value: JsonValue,
}

impl KeyMapping {
    /// Creates a mapping for a single-part key.
    pub fn new(entity_type_name: impl Into<String>, temp: &KeyValue, real: &KeyValue) -> Self {
        Self {
            entity_type_name: entity_type_name.into(),
            temp_value: temp.to_json(),
            real_value: real.to_json(),
        }
    }

    /// Resolves the mapping into `(temporary, real)` entity keys.
    pub fn to_keys(&self, metadata: &MetadataStore) -> ProtocolResult<(EntityKey, EntityKey)> {
        let temp = key_from_json(metadata, &self.entity_type_name, &key_parts(&self.temp_value))?;
        let real = key_from_json(metadata, &self.entity_type_name, &key_parts(&self.real_value))?;
        Ok((temp, real))
    }
}

/// Body of a successful save response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    /// Saved entities as the server now holds them.
    #[serde(default, alias = "Entities")]
    pub entities: Vec<JsonValue>,
    /// Temporary-to-real key replacements.
    #[serde(default, alias = "KeyMappings")]
    pub key_mappings: Vec<KeyMapping>,
}

impl SaveResponse {
    /// Reads a save response body.
    pub fn from_json(body: &JsonValue) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(body.clone())?)
    }

    /// Serializes to a JSON body.
    pub fn to_json(&self) -> ProtocolResult<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Identifies one entity in a server payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKeyPayload {
    /// Entity type name, possibly namespace-qualified.
    #[serde(alias = "EntityTypeName")]
    pub entity_type_name: String,
    /// Key values in declared key order.
    #[serde(alias = "KeyValues")]
    pub key_values: Vec<JsonValue>,
}

impl EntityKeyPayload {
    /// Describes `key` on the wire.
    pub fn from_key(key: &EntityKey) -> Self {
        Self {
            entity_type_name: key.entity_type().to_string(),
            key_values: key.values().iter().map(KeyValue::to_json).collect(),
        }
    }

    /// Resolves into an entity key.
    pub fn key(&self, metadata: &MetadataStore) -> ProtocolResult<EntityKey> {
        key_from_json(metadata, &self.entity_type_name, &self.key_values)
    }
}

/// A server-side failure attached to one entity of a save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityErrorPayload {
    /// Entity type name, possibly namespace-qualified.
    #[serde(alias = "EntityTypeName")]
    pub entity_type_name: String,
    /// Key values in declared key order.
    #[serde(alias = "KeyValues")]
    pub key_values: Vec<JsonValue>,
    /// Message.
    #[serde(alias = "ErrorMessage")]
    pub error_message: String,
    /// Offending property, if the error concerns one.
    #[serde(default, alias = "PropertyName", skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
}

impl EntityErrorPayload {
    /// Resolves the failing entity's key.
    pub fn key(&self, metadata: &MetadataStore) -> ProtocolResult<EntityKey> {
        key_from_json(metadata, &self.entity_type_name, &self.key_values)
    }
}

/// Body of a failed save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorPayload {
    /// Overall message.
    #[serde(default, alias = "Message")]
    pub message: String,
    /// Per-entity failures.
    #[serde(default, alias = "EntityErrors")]
    pub entity_errors: Vec<EntityErrorPayload>,
    /// Failure category; `concurrency` marks an optimistic concurrency failure.
    #[serde(default, alias = "ErrorKind", skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Entities that failed the concurrency check.
    #[serde(default, alias = "Conflicts", skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<EntityKeyPayload>,
    /// Entities the server did save despite the failure.
    #[serde(default, alias = "Entities", skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<JsonValue>,
    /// Key mappings for the entities the server did save.
    #[serde(default, alias = "KeyMappings", skip_serializing_if = "Vec::is_empty")]
    pub key_mappings: Vec<KeyMapping>,
}

impl ServerErrorPayload {
    /// Creates a payload carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Reads an error body. Returns `None` if it is not an error object.
    pub fn from_json(body: &JsonValue) -> Option<Self> {
        if !body.is_object() {
            return None;
        }
        serde_json::from_value(body.clone()).ok()
    }

    /// Serializes to a JSON body.
    pub fn to_json(&self) -> ProtocolResult<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    /// Returns true if the payload reports an optimistic concurrency failure.
    pub fn is_concurrency(&self) -> bool {
        self.error_kind
            .as_deref()
            .is_some_and(|kind| kind.eq_ignore_ascii_case("concurrency"))
    }
}

/// Builds an entity key from JSON key values, typed by the catalog.
pub fn key_from_json(
    metadata: &MetadataStore,
    entity_type_name: &str,
    values: &[JsonValue],
) -> ProtocolResult<EntityKey> {
    let entity_type = metadata.entity_type(entity_type_name)?;
    if values.len() != entity_type.key_names.len() {
        return Err(ProtocolError::invalid_structure(format!(
            "{} has {} key properties, payload carries {}",
            entity_type.name,
            entity_type.key_names.len(),
            values.len()
        )));
    }
    let mut parts = Vec::with_capacity(values.len());
    for (property, json) in entity_type.key_properties().zip(values) {
        let part = KeyValue::from_json(json, property.data_type).ok_or_else(|| {
            ProtocolError::invalid_structure(format!(
                "{json} is not a valid {:?} key for {}.{}",
                property.data_type, entity_type.name, property.name
            ))
        })?;
        parts.push(part);
    }
    Ok(EntityKey::new(entity_type.name.clone(), parts))
}

fn key_parts(value: &JsonValue) -> Vec<JsonValue> {
    match value {
        JsonValue::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}
