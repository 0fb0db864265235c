//! Entity metadata.
//!
//! The catalog describes every entity type the cache can hold: its key,
//! data properties and navigation properties. It is built once per
//! session and shared read-only by the cache and the protocol layer.

mod entity_type;
mod store;

pub use entity_type::{AutoGeneratedKey, DataProperty, DataType, EntityType, NavigationProperty};
pub use store::MetadataStore;
