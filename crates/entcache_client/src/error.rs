//! Error types for the client.

use entcache_core::{CacheError, EntityKey, ValidationError};
use entcache_protocol::ProtocolError;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failure reported by a [`DataService`](crate::DataService).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ServiceError {
    /// HTTP status, if the request got that far.
    pub status: Option<u16>,
    /// Description.
    pub message: String,
    /// Parsed response body, if there was one.
    pub body: Option<JsonValue>,
}

impl ServiceError {
    /// Creates an error without a status (connection refused, DNS, ...).
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            body: None,
        }
    }

    /// Creates an error for a non-success HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            body: None,
        }
    }

    /// Attaches a response body.
    #[must_use]
    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }
}

/// Errors that can occur in client operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The server rejected or failed a query.
    #[error("query failed: {message}")]
    Query {
        /// HTTP status, if any.
        status: Option<u16>,
        /// Description.
        message: String,
    },

    /// Client- or server-side validation failed during a save.
    #[error("validation failed: {message}")]
    Validation {
        /// Description.
        message: String,
        /// The individual failures.
        errors: Vec<ValidationError>,
    },

    /// The server reported an optimistic concurrency failure.
    #[error("concurrency conflict: {message}")]
    Concurrency {
        /// Description.
        message: String,
        /// Entities involved in the conflict.
        entities: Vec<EntityKey>,
    },

    /// The save request did not complete.
    #[error("transport error: {message}")]
    Transport {
        /// HTTP status, if any.
        status: Option<u16>,
        /// Description.
        message: String,
    },

    /// A response could not be read.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The cache refused an operation.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// A query did not complete in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Metadata could not be fetched or read.
    #[error("metadata error: {0}")]
    Metadata(String),
}

impl ClientError {
    /// Returns true for validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Validation { .. })
    }

    /// Returns true for concurrency conflicts.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, ClientError::Concurrency { .. })
    }

    /// Returns true for transport failures, timeouts included.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport { .. } | ClientError::Timeout(_))
    }
}
