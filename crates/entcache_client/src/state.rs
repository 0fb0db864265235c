//! Save coordinator state.

use entcache_core::{EntityHandle, EntityKey};

/// Whether a save is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveState {
    /// No save in flight.
    #[default]
    Idle,
    /// A save request is on the wire or being applied.
    Saving,
}

impl SaveState {
    /// Returns true while a save is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, SaveState::Saving)
    }
}

/// Counters over the lifetime of a save coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveStats {
    /// Saves that reached the server and succeeded.
    pub saves_completed: u64,
    /// Entities settled by successful saves.
    pub entities_saved: u64,
    /// Saves skipped because nothing was pending.
    pub empty_saves: u64,
    /// Saves stopped by client- or server-side validation.
    pub validation_failures: u64,
    /// Saves that hit a concurrency conflict.
    pub conflicts: u64,
    /// Saves that failed in transport.
    pub transport_failures: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of a successful save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveResult {
    /// Entities the save settled, in bundle order.
    pub saved: Vec<EntityHandle>,
    /// Temporary keys replaced by server keys, as `(temporary, real)`.
    pub key_mappings: Vec<(EntityKey, EntityKey)>,
}

impl SaveResult {
    /// Returns true if the save had nothing to send.
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_state_checks() {
        assert!(SaveState::Saving.is_active());
        assert!(!SaveState::Idle.is_active());
        assert_eq!(SaveState::default(), SaveState::Idle);
    }

    #[test]
    fn empty_result() {
        assert!(SaveResult::default().is_empty());
    }
}
