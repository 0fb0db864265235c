//! Query executor.
//!
//! A query goes out as a [`QueryRequest`], and the response is parsed into
//! a [`MergeBatch`] before the cache is locked for writing. Failures at any
//! step before the merge leave the cache exactly as it was.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::service::DataService;
use entcache_core::{
    EntityCache, EntityHandle, EntityKey, EntityQuery, EntityState, MergeBatch, MergeSource,
    MergeStrategy,
};
use entcache_protocol::{parse_query_response, QueryRequest};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Entities returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// Top-level results, in server order.
    pub results: Vec<EntityHandle>,
    /// Total count before paging, when the query asked for it.
    pub inline_count: Option<u64>,
}

/// Runs queries against a data service and merges the results.
pub struct QueryExecutor<S: DataService> {
    cache: Arc<RwLock<EntityCache>>,
    service: Arc<S>,
    merge_strategy: MergeStrategy,
    timeout: Option<Duration>,
}

impl<S: DataService> QueryExecutor<S> {
    /// Creates an executor over a shared cache.
    pub fn new(cache: Arc<RwLock<EntityCache>>, service: Arc<S>, config: &ClientConfig) -> Self {
        Self {
            cache,
            service,
            merge_strategy: config.query_merge_strategy,
            timeout: config.query_timeout,
        }
    }

    /// Sends a query, then merges the response into the cache.
    pub async fn execute(&self, query: &EntityQuery) -> ClientResult<QueryResult> {
        let (metadata, request, type_name) = {
            let cache = self.cache.read();
            let metadata = Arc::clone(cache.metadata());
            let request = QueryRequest::from_query(query, &metadata)?;
            let type_name = query.resolve_type(&metadata)?.name.clone();
            (metadata, request, type_name)
        };
        debug!("Executing query {}", request.path_and_query());

        let call = self.service.execute_query(&request, query);
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ClientError::Timeout(limit))?,
            None => call.await,
        };
        let body = outcome.map_err(|e| ClientError::Query {
            status: e.status,
            message: e.message,
        })?;

        let response = parse_query_response(&body)?;
        let batch = MergeBatch::parse(&metadata, Some(&type_name), &response.results)?;
        let strategy = query.merge_strategy.unwrap_or(self.merge_strategy);
        let results = self
            .cache
            .write()
            .merge_batch(&batch, strategy, MergeSource::Query)?;
        debug!(
            "Query {} returned {} entities ({} merged)",
            request.resource,
            results.len(),
            batch.len()
        );

        Ok(QueryResult {
            results,
            inline_count: response.inline_count,
        })
    }

    /// Evaluates a query against the cache only.
    pub fn execute_locally(&self, query: &EntityQuery) -> ClientResult<Vec<EntityHandle>> {
        Ok(self.cache.read().execute_local(query)?)
    }

    /// Finds an entity by key, asking the server unless it is already
    /// cached and `check_local_first` is set.
    ///
    /// Returns `None` if the server does not know the key either.
    pub async fn fetch_entity_by_key(
        &self,
        key: &EntityKey,
        check_local_first: bool,
    ) -> ClientResult<Option<EntityHandle>> {
        let query = {
            let cache = self.cache.read();
            if check_local_first {
                if let Some(handle) = cache.find_by_key(key) {
                    if cache.entity_state(handle) != EntityState::Deleted {
                        return Ok(Some(handle));
                    }
                }
            }
            let entity_type = cache.metadata().entity_type(key.entity_type())?;
            EntityQuery::for_key(entity_type, key)
        };
        Ok(self.execute(&query).await?.results.into_iter().next())
    }
}
