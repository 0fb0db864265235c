//! Error types for the entity cache.

use crate::entity::{EntityKey, EntityState};
use crate::metadata::DataType;
use crate::types::EntityHandle;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in entity cache operations.
///
/// All of these are programmer or data errors: they fail fast and leave
/// the cache unchanged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CacheError {
    /// A different live entity already holds this key.
    #[error("duplicate key: {key} is already tracked by {existing}")]
    DuplicateKey {
        /// The contested key.
        key: EntityKey,
        /// The handle that already owns the key.
        existing: EntityHandle,
    },

    /// Operation not allowed for the entity's current state.
    #[error("cannot {operation} on {entity} while it is {state}")]
    InvalidState {
        /// The entity.
        entity: EntityHandle,
        /// Its current state.
        state: EntityState,
        /// What was attempted.
        operation: String,
    },

    /// Handle was never issued by this cache.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityHandle),

    /// Entity type is not in the metadata store.
    #[error("unknown entity type: {name}")]
    UnknownEntityType {
        /// Type name that was looked up.
        name: String,
    },

    /// Property is not declared on the entity type.
    #[error("unknown property {property} on {entity_type}")]
    UnknownProperty {
        /// Entity type name.
        entity_type: String,
        /// Property name.
        property: String,
    },

    /// Value does not fit the property's data type.
    #[error("type mismatch for {entity_type}.{property}: expected {expected:?}, got {found}")]
    TypeMismatch {
        /// Entity type name.
        entity_type: String,
        /// Property name.
        property: String,
        /// Declared data type.
        expected: DataType,
        /// Description of the offending value.
        found: String,
    },

    /// Metadata is inconsistent or could not be read.
    #[error("invalid metadata: {message}")]
    InvalidMetadata {
        /// Description of the problem.
        message: String,
    },

    /// Entity has no value for a key property and none can be generated.
    #[error("missing key value {property} on {entity_type}")]
    MissingKey {
        /// Entity type name.
        entity_type: String,
        /// Key property without a value.
        property: String,
    },

    /// Operation not permitted for another reason.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CacheError {
    /// Creates an invalid metadata error.
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(
        entity: EntityHandle,
        state: EntityState,
        operation: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            entity,
            state,
            operation: operation.into(),
        }
    }

    /// Creates an unknown entity type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType { name: name.into() }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(entity_type: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            entity_type: entity_type.into(),
            property: property.into(),
        }
    }
}
