//! # entcache Client
//!
//! Async layer over the entcache entity cache.
//!
//! This crate provides:
//! - `DataService` transport abstraction, with an HTTP adapter and a mock
//! - Query executor (fetch, parse, merge)
//! - Save coordinator (one save in flight, FIFO queue, conflict policy)
//! - `EntityManager` facade tying the cache to a data service
//!
//! ## Key Invariants
//!
//! - A failed query never touches the cache
//! - Saves start strictly in submission order and never overlap
//! - The save bundle is a snapshot; edits made during the round trip survive it
//! - Cache locks are never held across an await point

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod manager;
mod query;
mod save;
mod service;
mod state;

pub use config::{ClientConfig, ConflictPolicy};
pub use error::{ClientError, ClientResult, ServiceError};
pub use http::{HttpClient, HttpDataService, HttpResponse};
pub use manager::EntityManager;
pub use query::{QueryExecutor, QueryResult};
pub use save::SaveCoordinator;
pub use service::{DataService, MockDataService};
pub use state::{SaveResult, SaveState, SaveStats};

pub use entcache_protocol::SaveOptions;
