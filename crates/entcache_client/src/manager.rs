//! Entity manager facade.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::query::{QueryExecutor, QueryResult};
use crate::save::SaveCoordinator;
use crate::service::DataService;
use crate::state::{SaveResult, SaveStats};
use entcache_core::{
    ChangeEvent, EntityCache, EntityHandle, EntityKey, EntityQuery, MetadataStore,
};
use entcache_protocol::SaveOptions;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::debug;

/// One unit of work: a cache of entities bound to a data service.
///
/// Create one manager per unit of work; [`create_empty_copy`] gives a
/// fresh cache over the same service and metadata.
///
/// [`create_empty_copy`]: EntityManager::create_empty_copy
pub struct EntityManager<S: DataService> {
    cache: Arc<RwLock<EntityCache>>,
    service: Arc<S>,
    config: ClientConfig,
    queries: QueryExecutor<S>,
    saves: SaveCoordinator<S>,
}

impl<S: DataService> EntityManager<S> {
    /// Creates a manager over an already loaded catalog.
    pub fn new(metadata: Arc<MetadataStore>, service: Arc<S>, config: ClientConfig) -> Self {
        let cache = Arc::new(RwLock::new(EntityCache::with_config(
            metadata,
            config.cache.clone(),
        )));
        Self {
            queries: QueryExecutor::new(Arc::clone(&cache), Arc::clone(&service), &config),
            saves: SaveCoordinator::new(Arc::clone(&cache), Arc::clone(&service), &config),
            cache,
            service,
            config,
        }
    }

    /// Creates a manager after fetching the catalog from the service.
    pub async fn from_service(service: Arc<S>, config: ClientConfig) -> ClientResult<Self> {
        let document = service
            .fetch_metadata()
            .await
            .map_err(|e| ClientError::Metadata(e.message))?;
        let metadata = MetadataStore::from_value(document)
            .map_err(|e| ClientError::Metadata(e.to_string()))?;
        debug!("Loaded metadata with {} entity types", metadata.len());
        Ok(Self::new(Arc::new(metadata), service, config))
    }

    /// New manager with the same metadata, service and configuration and
    /// an empty cache.
    pub fn create_empty_copy(&self) -> Self {
        let metadata = Arc::clone(self.cache.read().metadata());
        Self::new(metadata, Arc::clone(&self.service), self.config.clone())
    }

    /// Metadata catalog.
    pub fn metadata(&self) -> Arc<MetadataStore> {
        Arc::clone(self.cache.read().metadata())
    }

    /// Configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Data service.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Read access to the cache. Do not hold across an await.
    pub fn read(&self) -> RwLockReadGuard<'_, EntityCache> {
        self.cache.read()
    }

    /// Write access to the cache. Do not hold across an await.
    pub fn write(&self) -> RwLockWriteGuard<'_, EntityCache> {
        self.cache.write()
    }

    /// Runs a query on the server and merges the results.
    pub async fn execute_query(&self, query: &EntityQuery) -> ClientResult<QueryResult> {
        self.queries.execute(query).await
    }

    /// Runs a query against the cache only.
    pub fn execute_query_locally(&self, query: &EntityQuery) -> ClientResult<Vec<EntityHandle>> {
        self.queries.execute_locally(query)
    }

    /// Finds an entity by key, from the cache when allowed, otherwise
    /// from the server.
    pub async fn fetch_entity_by_key(
        &self,
        key: &EntityKey,
        check_local_first: bool,
    ) -> ClientResult<Option<EntityHandle>> {
        self.queries.fetch_entity_by_key(key, check_local_first).await
    }

    /// Saves pending changes. Waits for earlier saves to finish first.
    pub async fn save_changes(
        &self,
        entities: Option<Vec<EntityHandle>>,
        options: SaveOptions,
    ) -> ClientResult<SaveResult> {
        self.saves.save_changes(entities, options).await
    }

    /// Subscribes to cache change events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.cache.read().subscribe()
    }

    /// Returns true if any entity has pending changes.
    pub fn has_changes(&self) -> bool {
        self.cache.read().has_changes()
    }

    /// Entities with pending changes, optionally of one type.
    pub fn get_changes(&self, entity_type: Option<&str>) -> Vec<EntityHandle> {
        self.cache.read().get_changes(entity_type)
    }

    /// Rolls back every pending change.
    pub fn reject_changes(&self) -> Vec<EntityHandle> {
        self.cache.write().reject_changes()
    }

    /// Detaches every entity.
    pub fn clear(&self) {
        self.cache.write().clear();
    }

    /// Returns true while a save is in flight.
    pub fn is_saving(&self) -> bool {
        self.saves.is_saving()
    }

    /// Number of saves waiting behind the active one.
    pub fn queued_saves(&self) -> usize {
        self.saves.queued_saves()
    }

    /// Save counters.
    pub fn save_stats(&self) -> SaveStats {
        self.saves.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MockDataService;
    use entcache_core::{ChangeKind, EntityState, Value};
    use serde_json::json;

    fn catalog() -> serde_json::Value {
        json!({
            "entityTypes": [{
                "name": "Customer",
                "resourceName": "Customers",
                "keyNames": ["CustomerId"],
                "dataProperties": [
                    { "name": "CustomerId", "dataType": "Int32", "isNullable": false },
                    { "name": "CompanyName", "dataType": "String" }
                ]
            }]
        })
    }

    #[tokio::test]
    async fn from_service_loads_metadata() {
        let service = Arc::new(MockDataService::new());
        service.set_metadata(catalog());
        let manager = EntityManager::from_service(service, ClientConfig::default())
            .await
            .unwrap();
        assert_eq!(manager.metadata().len(), 1);
        assert!(!manager.has_changes());
    }

    #[tokio::test]
    async fn missing_metadata_is_a_metadata_error() {
        let service = Arc::new(MockDataService::new());
        let err = EntityManager::from_service(service, ClientConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Metadata(_)));

        let service = Arc::new(MockDataService::new());
        service.set_metadata(json!({ "entityTypes": [{ "name": "NoKey" }] }));
        let err = EntityManager::from_service(service, ClientConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Metadata(_)));
    }

    #[tokio::test]
    async fn query_then_edit_then_reject() {
        let service = Arc::new(MockDataService::new());
        service.set_metadata(catalog());
        let manager = EntityManager::from_service(Arc::clone(&service), ClientConfig::default())
            .await
            .unwrap();
        let events = manager.subscribe();

        service.push_query_response(json!([{ "CustomerId": 1, "CompanyName": "Alfa" }]));
        let result = manager
            .execute_query(&EntityQuery::from("Customers"))
            .await
            .unwrap();
        let handle = result.results[0];

        manager.write().set_value(handle, "CompanyName", "Beta").unwrap();
        assert_eq!(manager.get_changes(None), vec![handle]);
        assert_eq!(manager.reject_changes(), vec![handle]);
        assert_eq!(
            manager.read().get_value(handle, "CompanyName").unwrap(),
            Value::from("Alfa")
        );
        assert_eq!(manager.read().entity_state(handle), EntityState::Unchanged);

        let kinds: Vec<ChangeKind> = events.try_iter().map(|e| e.kind).collect();
        assert!(matches!(kinds.first(), Some(ChangeKind::Attached { .. })));
        assert!(kinds.iter().any(|k| matches!(k, ChangeKind::Rejected { .. })));
    }

    #[tokio::test]
    async fn empty_copy_shares_metadata_only() {
        let service = Arc::new(MockDataService::new());
        service.set_metadata(catalog());
        let manager = EntityManager::from_service(service, ClientConfig::default())
            .await
            .unwrap();
        manager
            .write()
            .attach_entity("Customer", &[("CustomerId", Value::from(1))], EntityState::Unchanged)
            .unwrap();

        let copy = manager.create_empty_copy();
        assert!(copy.read().is_empty());
        assert_eq!(manager.read().len(), 1);
        assert!(Arc::ptr_eq(&copy.metadata(), &manager.metadata()));
        assert!(Arc::ptr_eq(copy.service(), manager.service()));

        manager.clear();
        assert!(manager.read().is_empty());
        assert_eq!(manager.queued_saves(), 0);
        assert!(!manager.is_saving());
    }
}
