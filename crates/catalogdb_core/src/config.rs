//! Catalog configuration.

use std::time::Duration;

/// Configuration for opening a catalog.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the catalog if it doesn't exist.
    pub create_if_missing: bool,

    /// How long a committing transaction waits for the commit lock.
    pub commit_lock_timeout: Duration,

    /// Attempts at a concurrent schema update before giving up.
    pub schema_update_attempts: u32,

    /// Entities kept by the entity cache (0 disables caching).
    pub entity_cache_capacity: usize,

    /// Whether to fsync record stores and the header on every commit.
    pub sync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            commit_lock_timeout: Duration::from_secs(5),
            schema_update_attempts: 10,
            entity_cache_capacity: 1024,
            sync_on_commit: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the catalog if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the commit lock wait bound.
    #[must_use]
    pub const fn commit_lock_timeout(mut self, timeout: Duration) -> Self {
        self.commit_lock_timeout = timeout;
        self
    }

    /// Sets the schema update attempt budget.
    #[must_use]
    pub const fn schema_update_attempts(mut self, attempts: u32) -> Self {
        self.schema_update_attempts = attempts;
        self
    }

    /// Sets the entity cache capacity.
    #[must_use]
    pub const fn entity_cache_capacity(mut self, capacity: usize) -> Self {
        self.entity_cache_capacity = capacity;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}
