//! # entcache Testkit
//!
//! Test utilities for entcache.
//!
//! This crate provides:
//! - Metadata fixtures and manager helpers
//! - An in-memory data service that evaluates queries and commits saves
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entcache_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_service() {
//!     let service = northwind_service();
//!     let manager = manager_for(&service);
//!     // ... queries and saves
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod service;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::service::*;
}

pub use fixtures::*;
pub use generators::*;
pub use service::*;

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly tracing subscriber once per process.
///
/// `RUST_LOG` overrides the default `warn` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
