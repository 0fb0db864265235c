//! Save coordinator.
//!
//! Saves pass through a fair async gate, so they start in submission order
//! and at most one request is on the wire. The change set is snapshotted
//! once a save reaches the front of the queue, which means a queued save
//! sees the results of the saves before it.

use crate::config::{ClientConfig, ConflictPolicy};
use crate::error::{ClientError, ClientResult, ServiceError};
use crate::service::DataService;
use crate::state::{SaveResult, SaveState, SaveStats};
use entcache_core::{
    EntityCache, EntityHandle, EntityKey, EntityState, MergeBatch, MetadataStore, SaveEntry,
    ValidationError, ValidationKind, Value,
};
use entcache_protocol::{KeyMapping, SaveBundle, SaveOptions, SaveResponse, ServerErrorPayload};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Serializes saves against one cache and applies their outcome.
pub struct SaveCoordinator<S: DataService> {
    cache: Arc<RwLock<EntityCache>>,
    service: Arc<S>,
    conflict_policy: ConflictPolicy,
    validate_on_save: bool,
    gate: Mutex<()>,
    queued: AtomicUsize,
    state: RwLock<SaveState>,
    stats: RwLock<SaveStats>,
}

/// Decrements the queue counter when a save leaves the queue, including
/// when its future is dropped while waiting.
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resets the state to Idle when the active save finishes.
struct ActiveSave<'a>(&'a RwLock<SaveState>);

impl Drop for ActiveSave<'_> {
    fn drop(&mut self) {
        *self.0.write() = SaveState::Idle;
    }
}

impl<S: DataService> SaveCoordinator<S> {
    /// Creates a coordinator over a shared cache.
    pub fn new(cache: Arc<RwLock<EntityCache>>, service: Arc<S>, config: &ClientConfig) -> Self {
        Self {
            cache,
            service,
            conflict_policy: config.conflict_policy,
            validate_on_save: config.validate_on_save,
            gate: Mutex::new(()),
            queued: AtomicUsize::new(0),
            state: RwLock::new(SaveState::Idle),
            stats: RwLock::new(SaveStats::default()),
        }
    }

    /// Current state.
    pub fn state(&self) -> SaveState {
        *self.state.read()
    }

    /// Returns true while a save is in flight.
    pub fn is_saving(&self) -> bool {
        self.state().is_active()
    }

    /// Number of saves waiting behind the active one.
    pub fn queued_saves(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Lifetime counters.
    pub fn stats(&self) -> SaveStats {
        self.stats.read().clone()
    }

    /// Saves pending changes: all of them with `None`, or the listed
    /// entities only.
    pub async fn save_changes(
        &self,
        entities: Option<Vec<EntityHandle>>,
        options: SaveOptions,
    ) -> ClientResult<SaveResult> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let slot = QueueSlot(&self.queued);
        let _turn = self.gate.lock().await;
        drop(slot);
        *self.state.write() = SaveState::Saving;
        let _active = ActiveSave(&self.state);

        let (metadata, entries) = {
            let cache = self.cache.read();
            (
                Arc::clone(cache.metadata()),
                cache.prepare_save(entities.as_deref())?,
            )
        };
        if entries.is_empty() {
            debug!("Nothing to save");
            self.stats.write().empty_saves += 1;
            return Ok(SaveResult::default());
        }
        if self.validate_on_save {
            self.validate(&entries)?;
        }

        let bundle = SaveBundle::from_entries(&entries, &metadata, options)?;
        debug!("Saving {} entities", bundle.len());
        match self.service.save_changes(&bundle).await {
            Ok(body) => {
                let response = SaveResponse::from_json(&body)?;
                let result = self.settle(
                    &metadata,
                    &entries,
                    &response.entities,
                    &response.key_mappings,
                    &HashSet::new(),
                )?;
                let mut stats = self.stats.write();
                stats.saves_completed += 1;
                stats.entities_saved += result.saved.len() as u64;
                stats.last_error = None;
                debug!("Saved {} entities", result.saved.len());
                Ok(result)
            }
            Err(error) => {
                let error = self.fail(&metadata, &entries, error);
                self.stats.write().last_error = Some(error.to_string());
                Err(error)
            }
        }
    }

    fn validate(&self, entries: &[SaveEntry]) -> ClientResult<()> {
        let mut cache = self.cache.write();
        let mut errors = Vec::new();
        for entry in entries.iter().filter(|e| e.state != EntityState::Deleted) {
            if !cache.validate_entity(entry.handle)? {
                errors.extend(
                    cache
                        .get_validation_errors(entry.handle)
                        .into_iter()
                        .filter(|e| e.kind != ValidationKind::Server),
                );
            }
        }
        if errors.is_empty() {
            return Ok(());
        }
        drop(cache);
        self.stats.write().validation_failures += 1;
        debug!("Save stopped by {} validation errors", errors.len());
        Err(ClientError::Validation {
            message: format!("{} validation errors", errors.len()),
            errors,
        })
    }

    /// Applies key mappings, then completes every entry not listed in
    /// `failed` against the server's values. An entity whose mapping
    /// cannot be applied stays pending.
    fn settle(
        &self,
        metadata: &MetadataStore,
        entries: &[SaveEntry],
        entities: &[JsonValue],
        key_mappings: &[KeyMapping],
        failed: &HashSet<EntityKey>,
    ) -> ClientResult<SaveResult> {
        let mappings = key_mappings
            .iter()
            .map(|m| m.to_keys(metadata))
            .collect::<Result<Vec<_>, _>>()?;
        let batch = MergeBatch::parse(metadata, None, entities)?;
        let server_values: HashMap<&EntityKey, &BTreeMap<String, Value>> = batch
            .snapshots()
            .iter()
            .map(|s| (&s.key, &s.values))
            .collect();

        let mut cache = self.cache.write();
        let mut applied = Vec::with_capacity(mappings.len());
        let mut unmapped = HashSet::new();
        for (temp, real) in mappings {
            match cache.apply_key_mapping(&temp, &real) {
                Ok(Some(_)) => applied.push((temp, real)),
                Ok(None) => {}
                Err(e) => {
                    warn!("Could not map {temp} -> {real}, leaving it pending: {e}");
                    unmapped.insert(temp);
                }
            }
        }

        let mut saved = Vec::with_capacity(entries.len());
        for entry in entries {
            let current = cache.entity_key(entry.handle).cloned();
            let failed_entry =
                failed.contains(&entry.key) || current.as_ref().is_some_and(|k| failed.contains(k));
            let unmapped_entry = current.as_ref().is_some_and(|k| unmapped.contains(k));
            if failed_entry || unmapped_entry {
                continue;
            }
            let values = current.as_ref().and_then(|k| server_values.get(k).copied());
            cache.complete_save(entry, values)?;
            saved.push(entry.handle);
        }
        Ok(SaveResult {
            saved,
            key_mappings: applied,
        })
    }

    fn fail(
        &self,
        metadata: &MetadataStore,
        entries: &[SaveEntry],
        error: ServiceError,
    ) -> ClientError {
        let payload = error.body.as_ref().and_then(ServerErrorPayload::from_json);
        let conflict =
            error.status == Some(409) || payload.as_ref().is_some_and(|p| p.is_concurrency());

        if conflict {
            return self.resolve_conflict(metadata, entries, &error, payload.as_ref());
        }
        if let Some(payload) = payload.filter(|p| !p.entity_errors.is_empty()) {
            return self.record_entity_errors(metadata, entries, payload);
        }

        warn!("Save failed in transport: {}", error.message);
        self.stats.write().transport_failures += 1;
        ClientError::Transport {
            status: error.status,
            message: error.message,
        }
    }

    fn resolve_conflict(
        &self,
        metadata: &MetadataStore,
        entries: &[SaveEntry],
        error: &ServiceError,
        payload: Option<&ServerErrorPayload>,
    ) -> ClientError {
        let mut keys: Vec<EntityKey> = payload
            .map(|p| p.conflicts.iter().filter_map(|c| c.key(metadata).ok()).collect())
            .unwrap_or_default();
        if keys.is_empty() {
            keys = entries.iter().map(|e| e.key.clone()).collect();
        }
        warn!(
            "Save hit a concurrency conflict on {} entities, applying {:?}",
            keys.len(),
            self.conflict_policy
        );

        let mut cache = self.cache.write();
        match self.conflict_policy {
            ConflictPolicy::RejectAffected => {
                for key in &keys {
                    if let Some(handle) = cache.find_by_key(key) {
                        if let Err(e) = cache.reject_entity_changes(handle) {
                            warn!("Could not reject changes on {key}: {e}");
                        }
                    }
                }
            }
            ConflictPolicy::RejectAll => {
                cache.reject_changes();
            }
            ConflictPolicy::KeepChanges => {}
        }
        drop(cache);

        self.stats.write().conflicts += 1;
        ClientError::Concurrency {
            message: payload
                .map(|p| p.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| error.message.clone()),
            entities: keys,
        }
    }

    fn record_entity_errors(
        &self,
        metadata: &MetadataStore,
        entries: &[SaveEntry],
        payload: ServerErrorPayload,
    ) -> ClientError {
        let mut failed = HashSet::new();
        let mut errors = Vec::with_capacity(payload.entity_errors.len());
        for entity_error in &payload.entity_errors {
            let key = match entity_error.key(metadata) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Ignoring entity error for an unreadable key: {e}");
                    continue;
                }
            };
            let error = match &entity_error.property_name {
                Some(property) => ValidationError::property(
                    key.clone(),
                    property.clone(),
                    entity_error.error_message.clone(),
                    ValidationKind::Server,
                ),
                None => ValidationError::entity(
                    key.clone(),
                    entity_error.error_message.clone(),
                    ValidationKind::Server,
                ),
            };
            failed.insert(key);
            errors.push(error);
        }
        warn!("Save rejected {} entities with errors", failed.len());

        let settled = self.settle(
            metadata,
            entries,
            &payload.entities,
            &payload.key_mappings,
            &failed,
        );
        if let Err(e) = settled {
            warn!("Could not settle the saved part of a failed save: {e}");
        }
        {
            let mut cache = self.cache.write();
            for error in &errors {
                if let Some(handle) = cache.find_by_key(&error.entity_key) {
                    if let Err(e) = cache.add_validation_error(handle, error.clone()) {
                        warn!("Could not record {error}: {e}");
                    }
                }
            }
        }

        self.stats.write().validation_failures += 1;
        ClientError::Validation {
            message: payload.message,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MockDataService;
    use entcache_core::{
        AutoGeneratedKey, DataProperty, DataType, EntityType, KeyValue, NavigationProperty,
    };
    use serde_json::json;

    fn cache() -> Arc<RwLock<EntityCache>> {
        let metadata = MetadataStore::new()
            .with_entity_type(
                EntityType::new("Customer")
                    .with_key(["CustomerId"])
                    .with_auto_generated_key(AutoGeneratedKey::Identity)
                    .with_data_property(DataProperty::new("CustomerId", DataType::Int32).not_null())
                    .with_data_property(
                        DataProperty::new("CompanyName", DataType::String)
                            .not_null()
                            .with_max_length(20),
                    )
                    .with_navigation(NavigationProperty::collection("Orders", "Order", "Customer")),
            )
            .unwrap()
            .with_entity_type(
                EntityType::new("Order")
                    .with_key(["OrderId"])
                    .with_auto_generated_key(AutoGeneratedKey::Identity)
                    .with_data_property(DataProperty::new("OrderId", DataType::Int32).not_null())
                    .with_data_property(DataProperty::new("CustomerId", DataType::Int32))
                    .with_navigation(
                        NavigationProperty::scalar("Customer", "Customer", ["CustomerId"])
                            .with_inverse("Orders"),
                    ),
            )
            .unwrap();
        metadata.validate().unwrap();
        Arc::new(RwLock::new(EntityCache::new(Arc::new(metadata))))
    }

    fn coordinator(
        cache: &Arc<RwLock<EntityCache>>,
        service: &Arc<MockDataService>,
        config: ClientConfig,
    ) -> SaveCoordinator<MockDataService> {
        SaveCoordinator::new(Arc::clone(cache), Arc::clone(service), &config)
    }

    fn attach(cache: &Arc<RwLock<EntityCache>>, id: i32, name: &str) -> EntityHandle {
        cache
            .write()
            .attach_entity(
                "Customer",
                &[("CustomerId", Value::from(id)), ("CompanyName", Value::from(name))],
                EntityState::Unchanged,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn empty_save_skips_the_network() {
        let cache = cache();
        let service = Arc::new(MockDataService::new());
        let saves = coordinator(&cache, &service, ClientConfig::default());

        let result = saves.save_changes(None, SaveOptions::default()).await.unwrap();
        assert!(result.is_empty());
        assert!(service.bundles().is_empty());
        assert_eq!(saves.stats().empty_saves, 1);
        assert!(!saves.is_saving());
    }

    #[tokio::test]
    async fn saved_row_fetched_during_the_save_is_reconciled() {
        let cache = cache();
        let service = Arc::new(MockDataService::new());
        let saves = coordinator(&cache, &service, ClientConfig::default());

        let edited = attach(&cache, 1, "Alfreds");
        let created = {
            let mut cache = cache.write();
            cache.set_value(edited, "CompanyName", "Alfreds GmbH").unwrap();
            cache
                .create_entity("Customer", &[("CompanyName", Value::from("Contoso"))])
                .unwrap()
        };
        // A query that ran while the save was on the wire already merged row 42.
        let fetched = attach(&cache, 42, "Contoso");
        service.push_save_response(json!({
            "entities": [
                { "$type": "Customer", "CustomerId": 1, "CompanyName": "Alfreds GmbH" },
                { "$type": "Customer", "CustomerId": 42, "CompanyName": "Contoso" }
            ],
            "keyMappings": [
                { "entityTypeName": "Customer", "tempValue": -1, "realValue": 42 }
            ]
        }));

        let result = saves.save_changes(None, SaveOptions::default()).await.unwrap();
        assert_eq!(result.saved, vec![edited, created]);

        let cache = cache.read();
        assert_eq!(cache.entity_state(edited), EntityState::Unchanged);
        assert_eq!(cache.entity_state(created), EntityState::Unchanged);
        assert_eq!(cache.entity_state(fetched), EntityState::Detached);
        assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(42)]), Some(created));
        assert!(!cache.has_changes());
    }

    #[tokio::test]
    async fn colliding_mapping_does_not_block_the_rest() {
        let cache = cache();
        let service = Arc::new(MockDataService::new());
        let saves = coordinator(&cache, &service, ClientConfig::default());

        let edited = attach(&cache, 1, "Alfreds");
        let fetched = attach(&cache, 42, "Contoso");
        let created = {
            let mut cache = cache.write();
            cache.set_value(edited, "CompanyName", "Alfreds GmbH").unwrap();
            cache.set_value(fetched, "CompanyName", "Contoso AG").unwrap();
            cache
                .create_entity("Customer", &[("CompanyName", Value::from("Contoso"))])
                .unwrap()
        };
        service.push_save_response(json!({
            "entities": [],
            "keyMappings": [
                { "entityTypeName": "Customer", "tempValue": -1, "realValue": 42 }
            ]
        }));

        let result = saves
            .save_changes(Some(vec![edited, created]), SaveOptions::default())
            .await
            .unwrap();
        assert_eq!(result.saved, vec![edited]);
        assert!(result.key_mappings.is_empty());

        let cache = cache.read();
        assert_eq!(cache.entity_state(edited), EntityState::Unchanged);
        assert_eq!(cache.entity_state(created), EntityState::Added);
        assert_eq!(cache.entity_state(fetched), EntityState::Modified);
    }

    #[tokio::test]
    async fn key_mapping_rewrites_children() {
        let cache = cache();
        let service = Arc::new(MockDataService::new());
        let saves = coordinator(&cache, &service, ClientConfig::default());

        let (customer, order) = {
            let mut cache = cache.write();
            let customer = cache
                .create_entity("Customer", &[("CompanyName", Value::from("Contoso"))])
                .unwrap();
            let order = cache.create_entity("Order", &[]).unwrap();
            cache.set_navigation(order, "Customer", Some(customer)).unwrap();
            (customer, order)
        };
        service.push_save_response(json!({
            "entities": [
                { "$type": "Customer", "CustomerId": 42, "CompanyName": "Contoso Ltd" },
                { "$type": "Order", "OrderId": 7, "CustomerId": 42 }
            ],
            "keyMappings": [
                { "entityTypeName": "Customer", "tempValue": -1, "realValue": 42 },
                { "entityTypeName": "Order", "tempValue": -2, "realValue": 7 }
            ]
        }));

        let result = saves.save_changes(None, SaveOptions::default()).await.unwrap();
        assert_eq!(result.saved, vec![customer, order]);
        assert_eq!(result.key_mappings.len(), 2);

        let cache = cache.read();
        assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(-1)]), None);
        assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(42)]), Some(customer));
        assert_eq!(cache.entity_state(customer), EntityState::Unchanged);
        assert_eq!(cache.get_value(order, "CustomerId").unwrap(), Value::from(42));
        assert_eq!(cache.get_navigation(order, "Customer").unwrap(), Some(customer));
        assert_eq!(
            cache.get_value(customer, "CompanyName").unwrap(),
            Value::from("Contoso Ltd")
        );
        assert!(!cache.has_changes());

        let bundle = &service.bundles()[0];
        assert_eq!(bundle.entities[1].values["CustomerId"], json!(-1));
    }

    #[tokio::test]
    async fn client_validation_blocks_the_request() {
        let cache = cache();
        let service = Arc::new(MockDataService::new());
        let saves = coordinator(&cache, &service, ClientConfig::default());
        let handle = attach(&cache, 1, "Alfa");
        cache
            .write()
            .set_value(handle, "CompanyName", "A name that is far too long")
            .unwrap();

        let err = saves.save_changes(None, SaveOptions::default()).await.unwrap_err();
        assert!(err.is_validation());
        assert!(service.bundles().is_empty());
        assert_eq!(cache.read().get_validation_errors(handle).len(), 1);
        assert_eq!(cache.read().entity_state(handle), EntityState::Modified);

        let config = ClientConfig::default().with_validate_on_save(false);
        let saves = coordinator(&cache, &service, config);
        service.push_save_response(json!({ "entities": [] }));
        saves.save_changes(None, SaveOptions::default()).await.unwrap();
        assert_eq!(service.bundles().len(), 1);
    }

    #[tokio::test]
    async fn conflict_rejects_named_entities() {
        let cache = cache();
        let service = Arc::new(MockDataService::new());
        let saves = coordinator(&cache, &service, ClientConfig::default());
        let first = attach(&cache, 1, "Alfa");
        let second = attach(&cache, 2, "Bravo");
        {
            let mut cache = cache.write();
            cache.set_value(first, "CompanyName", "Alfa 2").unwrap();
            cache.set_value(second, "CompanyName", "Bravo 2").unwrap();
        }
        service.push_save_error(ServiceError::http(409, "row changed").with_body(json!({
            "message": "Customer 1 was changed by another user",
            "conflicts": [{ "entityTypeName": "Customer", "keyValues": [1] }]
        })));

        let err = saves.save_changes(None, SaveOptions::default()).await.unwrap_err();
        match err {
            ClientError::Concurrency { message, entities } => {
                assert_eq!(message, "Customer 1 was changed by another user");
                assert_eq!(entities, vec![EntityKey::single("Customer", 1)]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let cache = cache.read();
        assert_eq!(cache.entity_state(first), EntityState::Unchanged);
        assert_eq!(cache.get_value(first, "CompanyName").unwrap(), Value::from("Alfa"));
        assert_eq!(cache.entity_state(second), EntityState::Modified);
        assert_eq!(saves.stats().conflicts, 1);
    }

    #[tokio::test]
    async fn conflict_policies() {
        for (policy, expect_dirty) in [
            (ConflictPolicy::RejectAll, false),
            (ConflictPolicy::KeepChanges, true),
        ] {
            let cache = cache();
            let service = Arc::new(MockDataService::new());
            let config = ClientConfig::default().with_conflict_policy(policy);
            let saves = coordinator(&cache, &service, config);
            let handle = attach(&cache, 1, "Alfa");
            let other = attach(&cache, 2, "Bravo");
            cache.write().set_value(handle, "CompanyName", "Changed").unwrap();
            cache.write().delete_entity(other).unwrap();

            let body = json!({ "errorKind": "concurrency" });
            service.push_save_error(ServiceError::http(400, "conflict").with_body(body));
            let err = saves
                .save_changes(Some(vec![handle]), SaveOptions::default())
                .await
                .unwrap_err();
            assert!(err.is_concurrency());
            assert_eq!(cache.read().has_changes(), expect_dirty, "{policy:?}");
        }
    }

    #[tokio::test]
    async fn transport_failure_changes_nothing() {
        let cache = cache();
        let service = Arc::new(MockDataService::new());
        let saves = coordinator(&cache, &service, ClientConfig::default());
        let handle = attach(&cache, 1, "Alfa");
        cache.write().set_value(handle, "CompanyName", "Changed").unwrap();
        service.push_save_error(ServiceError::network("connection reset"));

        let err = saves.save_changes(None, SaveOptions::default()).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Transport {
                status: None,
                message: "connection reset".into()
            }
        );
        assert_eq!(cache.read().entity_state(handle), EntityState::Modified);
        assert_eq!(saves.stats().transport_failures, 1);
        assert!(saves.stats().last_error.is_some());
    }

    #[tokio::test]
    async fn entity_errors_settle_the_rest() {
        let cache = cache();
        let service = Arc::new(MockDataService::new());
        let saves = coordinator(&cache, &service, ClientConfig::default());
        let handles: Vec<_> = [(1, "Alfa"), (2, "Bravo"), (3, "Charlie")]
            .into_iter()
            .map(|(id, name)| attach(&cache, id, name))
            .collect();
        for handle in &handles {
            cache.write().set_value(*handle, "CompanyName", "Renamed").unwrap();
        }
        service.push_save_error(ServiceError::http(400, "validation").with_body(json!({
            "message": "1 entity failed",
            "entityErrors": [{
                "entityTypeName": "Customer",
                "keyValues": [2],
                "errorMessage": "name taken",
                "propertyName": "CompanyName"
            }]
        })));

        let err = saves.save_changes(None, SaveOptions::default()).await.unwrap_err();
        let ClientError::Validation { message, errors } = err else {
            panic!("expected a validation error");
        };
        assert_eq!(message, "1 entity failed");
        assert_eq!(errors.len(), 1);

        let cache = cache.read();
        assert_eq!(cache.entity_state(handles[0]), EntityState::Unchanged);
        assert_eq!(cache.entity_state(handles[1]), EntityState::Modified);
        assert_eq!(cache.entity_state(handles[2]), EntityState::Unchanged);
        let recorded = cache.get_validation_errors(handles[1]);
        assert_eq!(recorded[0].kind, ValidationKind::Server);
        assert_eq!(recorded[0].property_name.as_deref(), Some("CompanyName"));
    }

    #[tokio::test]
    async fn deleted_entities_leave_the_cache() {
        let cache = cache();
        let service = Arc::new(MockDataService::new());
        let saves = coordinator(&cache, &service, ClientConfig::default());
        let handle = attach(&cache, 1, "Alfa");
        cache.write().delete_entity(handle).unwrap();
        service.push_save_response(json!({ "entities": [], "keyMappings": [] }));

        saves.save_changes(None, SaveOptions::default()).await.unwrap();
        let cache = cache.read();
        assert!(!cache.contains(handle));
        assert_eq!(cache.resolve("Customer", &[KeyValue::Integer(1)]), None);
        assert_eq!(
            service.bundles()[0].entities[0].entity_aspect.entity_state,
            EntityState::Deleted
        );
    }
}
