//! # entcache Protocol
//!
//! Wire types exchanged between an entcache client and its data service.
//!
//! This crate provides:
//! - `QueryRequest` for rendering an `EntityQuery` as a resource path and query string
//! - `SaveBundle` for the body of a save request
//! - `SaveResponse`, `KeyMapping` and `ServerErrorPayload` for save replies
//! - `parse_query_response` for query replies
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod request;
mod response;
mod save;

pub use error::{ProtocolError, ProtocolResult};
pub use request::{format_filter, format_literal, property_type, QueryRequest};
pub use response::{
    key_from_json, parse_query_response, EntityErrorPayload, EntityKeyPayload, KeyMapping,
    QueryResponse, SaveResponse, ServerErrorPayload,
};
pub use save::{AutoGeneratedKeyPayload, BundleEntity, EntityAspectPayload, SaveBundle, SaveOptions};

/// Path of the save endpoint, relative to the service root.
pub const SAVE_CHANGES_PATH: &str = "SaveChanges";

/// Path of the metadata endpoint, relative to the service root.
pub const METADATA_PATH: &str = "Metadata";
