//! Data service abstraction.

use crate::error::ServiceError;
use async_trait::async_trait;
use entcache_core::EntityQuery;
use entcache_protocol::{QueryRequest, SaveBundle};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;

/// The remote side of an entity manager.
///
/// Implementations move JSON between the client and a server. They do not
/// interpret payloads beyond reporting failures: parsing and merging are
/// the client's job.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Fetches the metadata catalog document.
    async fn fetch_metadata(&self) -> Result<JsonValue, ServiceError>;

    /// Runs a query. `query` is the description `request` was rendered
    /// from, for services that evaluate queries without parsing URLs.
    async fn execute_query(
        &self,
        request: &QueryRequest,
        query: &EntityQuery,
    ) -> Result<JsonValue, ServiceError>;

    /// Submits a save bundle and returns the response body.
    async fn save_changes(&self, bundle: &SaveBundle) -> Result<JsonValue, ServiceError>;
}

/// A data service that replays canned responses, for testing.
#[derive(Debug, Default)]
pub struct MockDataService {
    metadata: Mutex<Option<JsonValue>>,
    query_responses: Mutex<VecDeque<Result<JsonValue, ServiceError>>>,
    save_responses: Mutex<VecDeque<Result<JsonValue, ServiceError>>>,
    queries: Mutex<Vec<QueryRequest>>,
    bundles: Mutex<Vec<SaveBundle>>,
}

impl MockDataService {
    /// Creates a mock with no responses queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the metadata document.
    pub fn set_metadata(&self, metadata: JsonValue) {
        *self.metadata.lock() = Some(metadata);
    }

    /// Queues the body of the next query response.
    pub fn push_query_response(&self, body: JsonValue) {
        self.query_responses.lock().push_back(Ok(body));
    }

    /// Queues a query failure.
    pub fn push_query_error(&self, error: ServiceError) {
        self.query_responses.lock().push_back(Err(error));
    }

    /// Queues the body of the next save response.
    pub fn push_save_response(&self, body: JsonValue) {
        self.save_responses.lock().push_back(Ok(body));
    }

    /// Queues a save failure.
    pub fn push_save_error(&self, error: ServiceError) {
        self.save_responses.lock().push_back(Err(error));
    }

    /// Query requests received so far.
    pub fn queries(&self) -> Vec<QueryRequest> {
        self.queries.lock().clone()
    }

    /// Save bundles received so far.
    pub fn bundles(&self) -> Vec<SaveBundle> {
        self.bundles.lock().clone()
    }
}

#[async_trait]
impl DataService for MockDataService {
    async fn fetch_metadata(&self) -> Result<JsonValue, ServiceError> {
        self.metadata
            .lock()
            .clone()
            .ok_or_else(|| ServiceError::http(404, "no metadata set"))
    }

    async fn execute_query(
        &self,
        request: &QueryRequest,
        _query: &EntityQuery,
    ) -> Result<JsonValue, ServiceError> {
        self.queries.lock().push(request.clone());
        self.query_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::network("no query response queued")))
    }

    async fn save_changes(&self, bundle: &SaveBundle) -> Result<JsonValue, ServiceError> {
        self.bundles.lock().push(bundle.clone());
        self.save_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::network("no save response queued")))
    }
}
