//! In-memory data service.
//!
//! Holds rows per entity type and behaves like a small server: queries
//! are evaluated against the rows (filter, ordering, paging, inline count
//! and expands), and saves are committed with identity key generation,
//! concurrency token checks and injectable faults.

use crate::fixtures::TYPE_NAMESPACE;
use async_trait::async_trait;
use entcache_client::{DataService, ServiceError};
use entcache_core::{
    AutoGeneratedKey, EntityKey, EntityQuery, EntityState, EntityType, KeyValue, MetadataStore,
    NavigationProperty, OrderBy, Value,
};
use entcache_protocol::{
    key_from_json, BundleEntity, EntityErrorPayload, EntityKeyPayload, KeyMapping, QueryRequest,
    SaveBundle, SaveResponse, ServerErrorPayload,
};
use parking_lot::Mutex;
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type Row = Map<String, JsonValue>;
type Tables = BTreeMap<String, Vec<Row>>;

/// A failure the next save should run into.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveFault {
    /// The request never reaches the server.
    Network(String),
    /// The server rejects one entity; the rest of the bundle commits.
    EntityError {
        /// Key of the rejected entity, as the client sent it.
        key: EntityKey,
        /// Offending property, if any.
        property: Option<String>,
        /// Error message.
        message: String,
    },
}

#[derive(Default)]
struct Store {
    tables: Tables,
    identities: HashMap<String, i64>,
    faults: VecDeque<SaveFault>,
    bundles: Vec<SaveBundle>,
    events: Vec<String>,
}

/// An in-memory server implementing [`DataService`].
pub struct InMemoryService {
    metadata: Arc<MetadataStore>,
    store: Mutex<Store>,
    save_delay: Option<Duration>,
    query_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    save_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl InMemoryService {
    /// Creates an empty service for the given catalog.
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self {
            metadata,
            store: Mutex::new(Store::default()),
            save_delay: None,
            query_delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Makes every save wait before committing.
    #[must_use]
    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = Some(delay);
        self
    }

    /// Makes every query wait before answering.
    #[must_use]
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    /// Catalog the service answers with.
    pub fn metadata(&self) -> Arc<MetadataStore> {
        Arc::clone(&self.metadata)
    }

    /// Inserts rows. Identity counters move past the seeded keys.
    pub fn seed(&self, entity_type: &str, rows: Vec<JsonValue>) {
        let mut store = self.store.lock();
        let key_name = self
            .metadata
            .get(entity_type)
            .and_then(|t| t.key_names.first().cloned());
        for row in rows {
            let JsonValue::Object(row) = row else {
                continue;
            };
            let seeded_id = key_name.as_ref().and_then(|k| row.get(k)).and_then(JsonValue::as_i64);
            if let Some(id) = seeded_id {
                let next = store.identities.entry(entity_type.to_string()).or_insert(1);
                *next = (*next).max(id + 1);
            }
            store
                .tables
                .entry(entity_type.to_string())
                .or_default()
                .push(row);
        }
    }

    /// Sets the next identity value handed out for a type.
    pub fn set_next_identity(&self, entity_type: &str, next: i64) {
        self.store
            .lock()
            .identities
            .insert(entity_type.to_string(), next);
    }

    /// Queues a fault for an upcoming save.
    pub fn fail_next_save(&self, fault: SaveFault) {
        self.store.lock().faults.push_back(fault);
    }

    /// Rows currently stored for a type.
    pub fn rows(&self, entity_type: &str) -> Vec<JsonValue> {
        self.store
            .lock()
            .tables
            .get(entity_type)
            .map(|rows| rows.iter().cloned().map(JsonValue::Object).collect())
            .unwrap_or_default()
    }

    /// Row stored under `key`.
    pub fn row(&self, key: &EntityKey) -> Option<JsonValue> {
        let store = self.store.lock();
        let entity_type = self.metadata.get(key.entity_type())?;
        find_row(&store.tables, entity_type, key).map(|row| JsonValue::Object(row.clone()))
    }

    /// Writes a column as another user would, bumping concurrency tokens.
    pub fn update_row(&self, key: &EntityKey, property: &str, value: JsonValue) -> bool {
        let mut store = self.store.lock();
        let Some(entity_type) = self.metadata.get(key.entity_type()) else {
            return false;
        };
        let Some(row) = find_row_mut(&mut store.tables, entity_type, key) else {
            return false;
        };
        row.insert(property.to_string(), value);
        bump_tokens(entity_type, row);
        true
    }

    /// Every bundle that reached the commit step, in arrival order.
    pub fn bundles(&self) -> Vec<SaveBundle> {
        self.store.lock().bundles.clone()
    }

    /// `start N` / `end N` markers for each save call.
    pub fn events(&self) -> Vec<String> {
        self.store.lock().events.clone()
    }

    /// Number of save calls received.
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Number of query calls received.
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Highest number of saves seen running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn answer_query(&self, query: &EntityQuery) -> Result<JsonValue, ServiceError> {
        let metadata: &MetadataStore = &self.metadata;
        let entity_type = query
            .resolve_type(metadata)
            .map_err(|e| ServiceError::http(404, e.to_string()))?;
        let store = self.store.lock();
        let tables = &store.tables;
        let reader = RowReader { metadata, tables };

        let mut rows: Vec<&Row> = tables
            .get(&entity_type.name)
            .map(|rows| rows.iter().collect())
            .unwrap_or_default();
        if let Some(predicate) = &query.predicate {
            rows.retain(|row| {
                predicate.evaluate(&|path: &str| reader.value(entity_type, row, path))
            });
        }
        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| reader.compare(entity_type, a, b, &query.order_by));
        }
        let total = rows.len();
        let page: Vec<JsonValue> = rows
            .into_iter()
            .skip(query.skip.unwrap_or(0))
            .take(query.take.unwrap_or(usize::MAX))
            .map(|row| {
                let paths: Vec<&str> = query.expand.iter().map(String::as_str).collect();
                reader.node(entity_type, row, &paths)
            })
            .collect();
        debug!("Answered {} with {} of {total} rows", entity_type.name, page.len());

        if query.inline_count {
            Ok(serde_json::json!({ "results": page, "inlineCount": total }))
        } else {
            Ok(JsonValue::Array(page))
        }
    }

    fn commit(&self, bundle: &SaveBundle) -> Result<JsonValue, ServiceError> {
        let metadata: &MetadataStore = &self.metadata;
        let mut store = self.store.lock();
        let mut rejected: HashMap<EntityKey, (Option<String>, String)> = HashMap::new();
        match store.faults.pop_front() {
            Some(SaveFault::Network(message)) => return Err(ServiceError::network(message)),
            Some(SaveFault::EntityError {
                key,
                property,
                message,
            }) => {
                rejected.insert(key, (property, message));
            }
            None => {}
        }
        store.bundles.push(bundle.clone());

        let mut items = Vec::with_capacity(bundle.entities.len());
        for entity in &bundle.entities {
            let entity_type = metadata
                .entity_type(&entity.entity_aspect.entity_type_name)
                .map_err(|e| ServiceError::http(400, e.to_string()))?;
            let key = row_key(metadata, entity_type, &entity.values)?;
            items.push((entity, entity_type, key));
        }

        let conflicts: Vec<EntityKeyPayload> = items
            .iter()
            .filter(|(entity, entity_type, key)| {
                matches!(
                    entity.entity_aspect.entity_state,
                    EntityState::Modified | EntityState::Deleted
                ) && !token_matches(&store.tables, entity, entity_type, key)
            })
            .map(|(_, _, key)| EntityKeyPayload::from_key(key))
            .collect();
        if !conflicts.is_empty() {
            let mut payload = ServerErrorPayload::message(format!(
                "{} entities were changed by another user",
                conflicts.len()
            ));
            payload.error_kind = Some("concurrency".to_string());
            payload.conflicts = conflicts;
            let body = encode(&payload)?;
            return Err(ServiceError::http(409, payload.message).with_body(body));
        }

        // Identities first, so children can point at their parent's real key.
        let mut mappings = Vec::new();
        for (entity, entity_type, key) in &items {
            if entity.entity_aspect.entity_state != EntityState::Added
                || entity_type.auto_generated_key != AutoGeneratedKey::Identity
                || rejected.contains_key(key)
            {
                continue;
            }
            let [KeyValue::Integer(temp)] = key.values() else {
                continue;
            };
            let next = store.identities.entry(entity_type.name.clone()).or_insert(1);
            let real = *next;
            *next += 1;
            mappings.push((entity_type.name.clone(), *temp, real));
        }

        let mut saved = Vec::new();
        for (entity, entity_type, key) in &items {
            if rejected.contains_key(key) {
                continue;
            }
            let mut row: Row = entity_type
                .data_properties
                .iter()
                .filter_map(|p| Some((p.name.clone(), entity.values.get(&p.name)?.clone())))
                .collect();
            remap_keys(metadata, entity_type, &mut row, &mappings);

            match entity.entity_aspect.entity_state {
                EntityState::Added => {
                    for token in entity_type.concurrency_properties() {
                        row.insert(token.name.clone(), JsonValue::from(1));
                    }
                    store
                        .tables
                        .entry(entity_type.name.clone())
                        .or_default()
                        .push(row.clone());
                    saved.push(typed(entity_type, row));
                }
                EntityState::Modified => {
                    let Some(stored) = find_row_mut(&mut store.tables, entity_type, key) else {
                        continue;
                    };
                    for (name, value) in row {
                        stored.insert(name, value);
                    }
                    bump_tokens(entity_type, stored);
                    let stored = stored.clone();
                    saved.push(typed(entity_type, stored));
                }
                EntityState::Deleted => {
                    if let Some(rows) = store.tables.get_mut(&entity_type.name) {
                        rows.retain(|r| !key_matches(entity_type, r, key));
                    }
                }
                EntityState::Unchanged | EntityState::Detached => {}
            }
        }

        let key_mappings = mappings
            .iter()
            .map(|(type_name, temp, real)| {
                KeyMapping::new(
                    server_type_name(type_name),
                    &KeyValue::Integer(*temp),
                    &KeyValue::Integer(*real),
                )
            })
            .collect();
        debug!(
            "Committed {} entities, {} rejected",
            saved.len(),
            rejected.len()
        );

        if rejected.is_empty() {
            let response = SaveResponse {
                entities: saved,
                key_mappings,
            };
            return response
                .to_json()
                .map_err(|e| ServiceError::http(500, e.to_string()));
        }

        let mut payload =
            ServerErrorPayload::message(format!("{} entities failed validation", rejected.len()));
        payload.entity_errors = rejected
            .into_iter()
            .map(|(key, (property, message))| EntityErrorPayload {
                entity_type_name: server_type_name(key.entity_type()),
                key_values: key.values().iter().map(KeyValue::to_json).collect(),
                error_message: message,
                property_name: property,
            })
            .collect();
        payload.entities = saved;
        payload.key_mappings = key_mappings;
        Err(ServiceError::http(400, payload.message.clone()).with_body(encode(&payload)?))
    }
}

#[async_trait]
impl DataService for InMemoryService {
    async fn fetch_metadata(&self) -> Result<JsonValue, ServiceError> {
        let document = self
            .metadata
            .to_json()
            .map_err(|e| ServiceError::http(500, e.to_string()))?;
        serde_json::from_str(&document).map_err(|e| ServiceError::http(500, e.to_string()))
    }

    async fn execute_query(
        &self,
        request: &QueryRequest,
        query: &EntityQuery,
    ) -> Result<JsonValue, ServiceError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        debug!("Query {}", request.path_and_query());
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        self.answer_query(query)
    }

    async fn save_changes(&self, bundle: &SaveBundle) -> Result<JsonValue, ServiceError> {
        let call = self.save_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.store.lock().events.push(format!("start {call}"));

        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = self.commit(bundle);

        self.store.lock().events.push(format!("end {call}"));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Reads rows through the catalog: typed values, navigations and expands.
struct RowReader<'a> {
    metadata: &'a MetadataStore,
    tables: &'a Tables,
}

impl RowReader<'_> {
    fn value(&self, entity_type: &EntityType, row: &Row, path: &str) -> Value {
        match path.split_once('.') {
            None => entity_type
                .data_property(path)
                .and_then(|p| Value::from_json(row.get(path)?, p.data_type))
                .unwrap_or(Value::Null),
            Some((head, rest)) => {
                let Some(navigation) = entity_type.navigation(head).filter(|n| n.is_scalar) else {
                    return Value::Null;
                };
                match self.parent(navigation, row) {
                    Some((target, parent)) => self.value(target, parent, rest),
                    None => Value::Null,
                }
            }
        }
    }

    fn compare(
        &self,
        entity_type: &EntityType,
        a: &Row,
        b: &Row,
        order_by: &[OrderBy],
    ) -> CmpOrdering {
        for order in order_by {
            let left = self.value(entity_type, a, &order.property);
            let right = self.value(entity_type, b, &order.property);
            let ordering = left.sort_cmp(&right);
            let ordering = if order.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != CmpOrdering::Equal {
                return ordering;
            }
        }
        CmpOrdering::Equal
    }

    fn parent<'r>(
        &'r self,
        navigation: &NavigationProperty,
        row: &Row,
    ) -> Option<(&'r EntityType, &'r Row)> {
        let target = self.metadata.get(&navigation.target_type)?;
        let foreign: Vec<&JsonValue> = navigation
            .foreign_key_names
            .iter()
            .map(|fk| row.get(fk).unwrap_or(&JsonValue::Null))
            .collect();
        if foreign.iter().any(|v| v.is_null()) {
            return None;
        }
        let parent = self.tables.get(&target.name)?.iter().find(|candidate| {
            target
                .key_names
                .iter()
                .zip(&foreign)
                .all(|(k, fk)| candidate.get(k) == Some(*fk))
        })?;
        Some((target, parent))
    }

    fn children<'r>(
        &'r self,
        parent_type: &EntityType,
        navigation: &NavigationProperty,
        row: &Row,
    ) -> Option<(&'r EntityType, Vec<&'r Row>)> {
        let target = self.metadata.get(&navigation.target_type)?;
        let inverse = self.metadata.inverse_of(navigation)?;
        let rows = self.tables.get(&target.name)?;
        let children = rows
            .iter()
            .filter(|child| {
                parent_type
                    .key_names
                    .iter()
                    .zip(&inverse.foreign_key_names)
                    .all(|(k, fk)| child.get(fk).is_some() && child.get(fk) == row.get(k))
            })
            .collect();
        Some((target, children))
    }

    fn node(&self, entity_type: &EntityType, row: &Row, expand: &[&str]) -> JsonValue {
        let mut node = row.clone();
        node.insert(
            "$type".to_string(),
            JsonValue::String(server_type_name(&entity_type.name)),
        );

        let mut nested: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for path in expand {
            match path.split_once('.') {
                Some((head, tail)) => nested.entry(head).or_default().push(tail),
                None => {
                    nested.entry(*path).or_default();
                }
            }
        }

        for (name, tails) in nested {
            let Some(navigation) = entity_type.navigation(name) else {
                continue;
            };
            let related = if navigation.is_scalar {
                self.parent(navigation, row)
                    .map(|(target, parent)| self.node(target, parent, &tails))
                    .unwrap_or(JsonValue::Null)
            } else {
                match self.children(entity_type, navigation, row) {
                    Some((target, children)) => JsonValue::Array(
                        children
                            .into_iter()
                            .map(|child| self.node(target, child, &tails))
                            .collect(),
                    ),
                    None => JsonValue::Array(Vec::new()),
                }
            };
            node.insert(navigation.name.clone(), related);
        }
        JsonValue::Object(node)
    }
}

fn server_type_name(name: &str) -> String {
    format!("{TYPE_NAMESPACE}.{name}, Northwind")
}

fn typed(entity_type: &EntityType, mut row: Row) -> JsonValue {
    row.insert(
        "$type".to_string(),
        JsonValue::String(server_type_name(&entity_type.name)),
    );
    JsonValue::Object(row)
}

fn encode(payload: &ServerErrorPayload) -> Result<JsonValue, ServiceError> {
    payload
        .to_json()
        .map_err(|e| ServiceError::http(500, e.to_string()))
}

fn row_key(
    metadata: &MetadataStore,
    entity_type: &EntityType,
    row: &Row,
) -> Result<EntityKey, ServiceError> {
    let values: Vec<JsonValue> = entity_type
        .key_names
        .iter()
        .map(|k| row.get(k).cloned().unwrap_or(JsonValue::Null))
        .collect();
    key_from_json(metadata, &entity_type.name, &values)
        .map_err(|e| ServiceError::http(400, e.to_string()))
}

fn key_matches(entity_type: &EntityType, row: &Row, key: &EntityKey) -> bool {
    entity_type
        .key_properties()
        .zip(key.values())
        .all(|(property, value)| {
            row.get(&property.name)
                .and_then(|json| KeyValue::from_json(json, property.data_type))
                .as_ref()
                == Some(value)
        })
}

fn find_row<'a>(tables: &'a Tables, entity_type: &EntityType, key: &EntityKey) -> Option<&'a Row> {
    tables
        .get(&entity_type.name)?
        .iter()
        .find(|row| key_matches(entity_type, row, key))
}

fn find_row_mut<'a>(
    tables: &'a mut Tables,
    entity_type: &EntityType,
    key: &EntityKey,
) -> Option<&'a mut Row> {
    tables
        .get_mut(&entity_type.name)?
        .iter_mut()
        .find(|row| key_matches(entity_type, row, key))
}

/// True if the row exists and every concurrency token sent matches the
/// stored one.
fn token_matches(
    tables: &Tables,
    entity: &BundleEntity,
    entity_type: &EntityType,
    key: &EntityKey,
) -> bool {
    let Some(row) = find_row(tables, entity_type, key) else {
        return false;
    };
    entity_type
        .concurrency_properties()
        .all(|token| entity.values.get(&token.name) == row.get(&token.name))
}

fn bump_tokens(entity_type: &EntityType, row: &mut Row) {
    for token in entity_type.concurrency_properties() {
        let next = row.get(&token.name).and_then(JsonValue::as_i64).unwrap_or(0) + 1;
        row.insert(token.name.clone(), JsonValue::from(next));
    }
}

/// Rewrites foreign keys that still hold a temporary key of their target.
fn remap_keys(
    metadata: &MetadataStore,
    entity_type: &EntityType,
    row: &mut Row,
    mappings: &[(String, i64, i64)],
) {
    let own = mappings.iter().find(|(type_name, temp, _)| {
        *type_name == entity_type.name
            && entity_type
                .key_names
                .first()
                .and_then(|k| row.get(k))
                .and_then(JsonValue::as_i64)
                == Some(*temp)
    });
    if let (Some((_, _, real)), Some(key_name)) = (own, entity_type.key_names.first()) {
        row.insert(key_name.clone(), JsonValue::from(*real));
    }

    for navigation in entity_type.scalar_navigations() {
        let [fk] = navigation.foreign_key_names.as_slice() else {
            continue;
        };
        let Some(target) = metadata.get(&navigation.target_type) else {
            continue;
        };
        let Some(current) = row.get(fk).and_then(JsonValue::as_i64) else {
            continue;
        };
        if let Some((_, _, real)) = mappings
            .iter()
            .find(|(type_name, temp, _)| *type_name == target.name && *temp == current)
        {
            row.insert(fk.clone(), JsonValue::from(*real));
        }
    }
}
