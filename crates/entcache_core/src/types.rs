//! Core type definitions for the entity cache.

use std::fmt;

/// Reference to one tracked entity slot in an [`EntityCache`](crate::EntityCache).
///
/// Handles are monotonically increasing and never reused within a cache,
/// so handle order is insertion order. Two lookups that return the same
/// handle refer to the same in-memory entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityHandle(pub u64);

impl EntityHandle {
    /// Creates a handle from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next handle.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_ordering() {
        let h1 = EntityHandle::new(1);
        let h2 = h1.next();
        assert!(h1 < h2);
        assert_eq!(h2.as_u64(), 2);
    }

    #[test]
    fn handle_display() {
        assert_eq!(format!("{}", EntityHandle::new(42)), "entity:42");
    }
}
