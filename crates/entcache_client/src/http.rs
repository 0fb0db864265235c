//! HTTP data service.
//!
//! The HTTP client itself is abstracted via a trait so any library
//! (reqwest, hyper, a browser fetch shim) can carry the requests.

use crate::error::ServiceError;
use crate::service::DataService;
use async_trait::async_trait;
use entcache_core::EntityQuery;
use entcache_protocol::{QueryRequest, SaveBundle, METADATA_PATH, SAVE_CHANGES_PATH};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tracing::debug;

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body text.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// `Err` means no response was received at all; non-2xx statuses are
/// returned as responses.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    async fn get(&self, url: &str) -> Result<HttpResponse, String>;

    /// Sends a POST request with a JSON body.
    async fn post(&self, url: &str, body: String) -> Result<HttpResponse, String>;
}

/// Data service speaking JSON over HTTP.
pub struct HttpDataService<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpDataService<C> {
    /// Creates a service rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the service root.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn settle(&self, outcome: Result<HttpResponse, String>) -> Result<JsonValue, ServiceError> {
        let response = outcome.map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            ServiceError::network(e)
        })?;
        let body = parse_body(&response.body);

        if response.is_success() {
            *self.last_error.write() = None;
            return body.map_err(|e| ServiceError::http(response.status, e));
        }

        let body = body.ok();
        let message = body
            .as_ref()
            .and_then(|b| b.get("message").or_else(|| b.get("Message")))
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", response.status));
        *self.last_error.write() = Some(message.clone());

        let error = ServiceError::http(response.status, message);
        Err(match body {
            Some(body) => error.with_body(body),
            None => error,
        })
    }
}

#[async_trait]
impl<C: HttpClient> DataService for HttpDataService<C> {
    async fn fetch_metadata(&self) -> Result<JsonValue, ServiceError> {
        let url = self.url(METADATA_PATH);
        debug!("GET {url}");
        let outcome = self.client.get(&url).await;
        self.settle(outcome)
    }

    async fn execute_query(
        &self,
        request: &QueryRequest,
        _query: &EntityQuery,
    ) -> Result<JsonValue, ServiceError> {
        let url = request.url(&self.base_url);
        debug!("GET {url}");
        let outcome = self.client.get(&url).await;
        self.settle(outcome)
    }

    async fn save_changes(&self, bundle: &SaveBundle) -> Result<JsonValue, ServiceError> {
        let body = bundle
            .to_json()
            .map_err(|e| ServiceError::network(format!("failed to encode save bundle: {e}")))?;
        let resource = bundle.save_options.resource_name.as_deref();
        let url = self.url(resource.unwrap_or(SAVE_CHANGES_PATH));
        debug!("POST {url} ({} entities)", bundle.len());
        let outcome = self.client.post(&url, body.to_string()).await;
        self.settle(outcome)
    }
}

fn parse_body(body: &str) -> Result<JsonValue, String> {
    if body.trim().is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_str(body).map_err(|e| format!("malformed response body: {e}"))
}
