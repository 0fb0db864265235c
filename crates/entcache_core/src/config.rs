//! Cache configuration.

/// Configuration for an [`EntityCache`](crate::EntityCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// First temporary integer key handed out to new entities.
    pub temp_key_seed: i64,

    /// Number of change events kept for polling.
    pub max_event_history: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            temp_key_seed: -1,
            max_event_history: 10_000,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the first temporary integer key. Must be negative.
    #[must_use]
    pub const fn temp_key_seed(mut self, seed: i64) -> Self {
        self.temp_key_seed = seed;
        self
    }

    /// Sets the change event history size.
    #[must_use]
    pub const fn max_event_history(mut self, size: usize) -> Self {
        self.max_event_history = size;
        self
    }
}
