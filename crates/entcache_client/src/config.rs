//! Configuration for the entity manager.

use entcache_core::{CacheConfig, MergeStrategy};
use std::time::Duration;

/// What a save does to local changes when the server reports an
/// optimistic concurrency failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Roll back the entities the server named (or the whole bundle if it
    /// named none).
    #[default]
    RejectAffected,
    /// Roll back every pending change in the cache.
    RejectAll,
    /// Leave local state alone; the caller decides.
    KeepChanges,
}

/// Configuration for an [`EntityManager`](crate::EntityManager).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service root URL.
    pub service_name: String,
    /// Merge strategy for queries that do not set their own.
    pub query_merge_strategy: MergeStrategy,
    /// Reaction to concurrency failures during save.
    pub conflict_policy: ConflictPolicy,
    /// Run client-side validation before sending a save.
    pub validate_on_save: bool,
    /// Upper bound on a query round trip.
    pub query_timeout: Option<Duration>,
    /// Configuration of the underlying cache.
    pub cache: CacheConfig,
}

impl ClientConfig {
    /// Creates a configuration for the service at `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            query_merge_strategy: MergeStrategy::PreserveChanges,
            conflict_policy: ConflictPolicy::RejectAffected,
            validate_on_save: true,
            query_timeout: None,
            cache: CacheConfig::default(),
        }
    }

    /// Sets the service root URL.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Sets the default query merge strategy.
    pub fn with_query_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.query_merge_strategy = strategy;
        self
    }

    /// Sets the concurrency conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Enables or disables validation before save.
    pub fn with_validate_on_save(mut self, validate: bool) -> Self {
        self.validate_on_save = validate;
        self
    }

    /// Sets the query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Sets the cache configuration.
    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new("https://api.example.com/breeze")
            .with_query_merge_strategy(MergeStrategy::OverwriteChanges)
            .with_conflict_policy(ConflictPolicy::KeepChanges)
            .with_validate_on_save(false)
            .with_query_timeout(Duration::from_secs(5))
            .with_cache_config(CacheConfig::new().temp_key_seed(-100));

        assert_eq!(config.service_name, "https://api.example.com/breeze");
        assert_eq!(config.query_merge_strategy, MergeStrategy::OverwriteChanges);
        assert_eq!(config.conflict_policy, ConflictPolicy::KeepChanges);
        assert!(!config.validate_on_save);
        assert_eq!(config.query_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.cache.temp_key_seed, -100);
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.query_merge_strategy, MergeStrategy::PreserveChanges);
        assert_eq!(config.conflict_policy, ConflictPolicy::RejectAffected);
        assert!(config.validate_on_save);
        assert_eq!(config.query_timeout, None);
    }
}
