//! CLI command implementations.

pub mod inspect;
pub mod query_url;
pub mod verify;

use entcache_core::{CacheError, DataType, MetadataStore};
use entcache_protocol::ProtocolError;
use std::path::Path;
use thiserror::Error;

/// Errors reported by the CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The metadata file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File that failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A `--where` clause is not `<property> <operator> <value>`.
    #[error("invalid filter clause '{0}': expected '<property> <operator> <value>'")]
    InvalidClause(String),

    /// A clause uses an operator token nobody recognizes.
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// A clause names a property the entity type does not have.
    #[error("{entity_type} has no property '{property}'")]
    UnknownProperty {
        /// Queried entity type.
        entity_type: String,
        /// Property path from the clause.
        property: String,
    },

    /// A clause value does not parse as the property's type.
    #[error("'{literal}' is not a valid {data_type:?} value for {property}")]
    InvalidLiteral {
        /// Property path from the clause.
        property: String,
        /// Declared type of the property.
        data_type: DataType,
        /// Raw text from the clause.
        literal: String,
    },

    /// Metadata or query error from the core crate.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Request rendering error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Reads a metadata document from disk and validates it.
pub fn load_metadata(path: &Path) -> Result<MetadataStore, CliError> {
    let text = read_file(path)?;
    Ok(MetadataStore::from_json(&text)?)
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })
}
