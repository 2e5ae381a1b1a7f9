use std::num::NonZeroUsize;
use std::time::Duration;

/// Cache tuning knobs, resolved from `[cache]` in the settings file.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries held by the memory layer.
    pub memory_limit: usize,
    /// TTL applied when an entry is stored without an explicit one.
    pub default_ttl: Duration,
    /// Capacity of the background revalidation queue.
    pub revalidation_queue_depth: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_limit: 1000,
            default_ttl: Duration::from_secs(300),
            revalidation_queue_depth: 64,
        }
    }
}

impl CacheConfig {
    pub fn memory_limit_non_zero(&self) -> NonZeroUsize {
        // Settings validation rejects zero; this is the in-crate backstop.
        NonZeroUsize::new(self.memory_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
