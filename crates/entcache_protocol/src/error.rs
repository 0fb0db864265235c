//! Error types for the protocol crate.

use entcache_core::CacheError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while reading or writing wire payloads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Payload is not valid JSON or does not fit the expected shape.
    #[error("malformed JSON payload: {0}")]
    Json(String),

    /// Payload is JSON but not a structure this protocol understands.
    #[error("invalid payload structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// Payload referenced types or keys unknown to the catalog.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ProtocolError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        ProtocolError::InvalidStructure {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Json(err.to_string())
    }
}
