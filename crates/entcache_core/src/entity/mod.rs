//! Tracked entities and their bookkeeping.

mod aspect;
mod key;
mod state;

pub use aspect::{EntityAspect, TrackedEntity};
pub use key::EntityKey;
pub use state::EntityState;
