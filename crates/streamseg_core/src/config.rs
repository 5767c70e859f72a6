//! Store configuration.

use std::time::Duration;

/// Configuration for opening a segment store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum size of a single log ledger before a new one is started.
    pub max_ledger_size: u64,

    /// Whether to flush the durable medium on every append (safer but slower).
    pub sync_on_append: bool,

    /// Upper bound on cached bytes. Unflushed data is pinned and may push the
    /// cache above this until the storage writer catches up.
    pub cache_max_size: u64,

    /// Maximum number of appends queued on the write sequencer at once.
    pub max_concurrent_appends: usize,

    /// How long a future read waits for data before failing.
    pub future_read_timeout: Duration,

    /// Largest single storage-tier fetch issued for one read entry.
    pub max_storage_read_size: usize,

    /// Number of logged operations after which a checkpoint is taken
    /// automatically (0 = never).
    pub checkpoint_every_ops: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_ledger_size: 64 * 1024 * 1024,   // 64 MB
            sync_on_append: true,
            cache_max_size: 256 * 1024 * 1024,   // 256 MB
            max_concurrent_appends: 1024,
            future_read_timeout: Duration::from_secs(30),
            max_storage_read_size: 1024 * 1024, // 1 MB
            checkpoint_every_ops: 0,             // disabled
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum ledger size.
    #[must_use]
    pub const fn max_ledger_size(mut self, size: u64) -> Self {
        self.max_ledger_size = size;
        self
    }

    /// Sets whether to flush the log medium on every append.
    #[must_use]
    pub const fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Sets the cache size bound.
    #[must_use]
    pub const fn cache_max_size(mut self, size: u64) -> Self {
        self.cache_max_size = size;
        self
    }

    /// Sets the bound on concurrently queued appends.
    #[must_use]
    pub const fn max_concurrent_appends(mut self, value: usize) -> Self {
        self.max_concurrent_appends = value;
        self
    }

    /// Sets the future read timeout.
    #[must_use]
    pub const fn future_read_timeout(mut self, timeout: Duration) -> Self {
        self.future_read_timeout = timeout;
        self
    }

    /// Sets the largest single storage-tier fetch.
    #[must_use]
    pub const fn max_storage_read_size(mut self, size: usize) -> Self {
        self.max_storage_read_size = size;
        self
    }

    /// Sets the automatic checkpoint interval in operations.
    #[must_use]
    pub const fn checkpoint_every_ops(mut self, ops: u64) -> Self {
        self.checkpoint_every_ops = ops;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.sync_on_append);
        assert_eq!(config.checkpoint_every_ops, 0);
        assert!(config.max_concurrent_appends > 0);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .sync_on_append(false)
            .max_ledger_size(1024)
            .cache_max_size(4096)
            .future_read_timeout(Duration::from_millis(50));

        assert!(!config.sync_on_append);
        assert_eq!(config.max_ledger_size, 1024);
        assert_eq!(config.cache_max_size, 4096);
        assert_eq!(config.future_read_timeout, Duration::from_millis(50));
    }
}
