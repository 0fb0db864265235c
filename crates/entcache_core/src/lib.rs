//! # entcache Core
//!
//! Client-side entity cache for entcache.
//!
//! This crate provides:
//! - Entity metadata (types, data properties, navigation properties)
//! - Entity keys and the identity map
//! - The entity state machine and change tracking
//! - Navigation resolution between foreign keys and related entities
//! - Merging of server payloads into the cache
//! - Local query evaluation and client-side validation
//!
//! ## Key Invariants
//!
//! - One tracked entity per `EntityKey`
//! - Detached entities are never reachable from the identity map
//! - Foreign keys and navigation targets never disagree
//! - `has_changes()` is true iff `get_changes()` is non-empty
//!
//! The cache is synchronous and performs no I/O. The async query and save
//! layer lives in `entcache_client`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod change_feed;
mod config;
mod entity;
mod error;
mod identity;
mod key_generator;
mod merge;
mod metadata;
mod navigation;
mod query;
mod types;
mod validation;
mod value;

pub use cache::{EntityCache, SaveEntry};
pub use change_feed::{ChangeEvent, ChangeFeed, ChangeKind, MergeSource};
pub use config::CacheConfig;
pub use entity::{EntityAspect, EntityKey, EntityState, TrackedEntity};
pub use error::{CacheError, CacheResult};
pub use identity::IdentityMap;
pub use key_generator::KeyGenerator;
pub use merge::{EntitySnapshot, MergeBatch, MergeStrategy};
pub use metadata::{
    AutoGeneratedKey, DataProperty, DataType, EntityType, MetadataStore, NavigationProperty,
};
pub use navigation::{NavigationIndex, NavigationRef};
pub use query::{EntityQuery, Operator, OrderBy, Predicate};
pub use types::EntityHandle;
pub use validation::{ValidationError, ValidationKind};
pub use value::{KeyValue, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
