//! Entity state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an entity relative to the server.
///
/// ```text
/// Unchanged --write--> Modified --accept--> Unchanged
/// Unchanged/Modified --delete--> Deleted --accept--> Detached
/// Added --delete--> Detached
/// Added --accept--> Unchanged
/// any --detach--> Detached
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityState {
    /// Not tracked by any cache.
    #[default]
    Detached,
    /// Tracked and identical to the last known server state.
    Unchanged,
    /// New on the client; not yet saved.
    Added,
    /// Tracked with local edits.
    Modified,
    /// Marked for deletion on the next save.
    Deleted,
}

impl EntityState {
    /// Returns true for states that take part in a save.
    pub fn is_dirty(self) -> bool {
        matches!(
            self,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }

    /// Returns true if property writes are allowed.
    pub fn accepts_writes(self) -> bool {
        matches!(
            self,
            EntityState::Unchanged | EntityState::Added | EntityState::Modified
        )
    }

    /// Returns true for [`EntityState::Detached`].
    pub fn is_detached(self) -> bool {
        self == EntityState::Detached
    }

    /// Name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityState::Detached => "Detached",
            EntityState::Unchanged => "Unchanged",
            EntityState::Added => "Added",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
