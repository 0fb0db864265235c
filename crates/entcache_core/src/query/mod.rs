//! Query descriptions.
//!
//! An [`EntityQuery`] describes what to fetch; the protocol crate turns it
//! into a wire request and the cache can evaluate it locally.

mod entity_query;
mod predicate;

pub use entity_query::{EntityQuery, OrderBy};
pub use predicate::{Operator, Predicate};
