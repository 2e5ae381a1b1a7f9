//! The layered cache surface.
//!
//! Reads check memory first, then the external store (backfilling memory on
//! a hit). Writes go to both layers. No layer failure ever reaches a caller:
//! errors are counted and read as misses.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::guard::{GuardedStore, StoreHealth};
use super::lock::mutex_lock;
use super::memory::MemoryStore;
use super::pattern::glob_to_regex;
use super::tasks::RevalidationQueue;

const SOURCE: &str = "cache::layered";

/// Logical key domains inside the shared store.
const DATA_PREFIX: &str = "data";
const TAG_PREFIX: &str = "tag";

/// Rolling latency window size.
const TIMING_WINDOW: usize = 1000;

#[derive(Debug, Clone)]
pub struct EntryOptions {
    pub ttl: Duration,
    /// Age after which a cached value is served stale while a background
    /// refresh runs. `None` disables stale serving for the entry.
    pub stale_after: Option<Duration>,
    pub tags: Vec<String>,
    pub version: Option<String>,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            stale_after: None,
            tags: Vec::new(),
            version: None,
        }
    }
}

impl EntryOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    pub fn tagged(ttl: Duration, tags: Vec<String>) -> Self {
        Self {
            ttl,
            tags,
            ..Self::default()
        }
    }
}

/// Wire form of an entry in the external store.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    data: serde_json::Value,
    stored_at_unix: i64,
    ttl_secs: u64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

impl Envelope {
    fn wall_age(&self) -> Duration {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Duration::from_secs(now.saturating_sub(self.stored_at_unix).max(0) as u64)
    }

    fn is_expired(&self) -> bool {
        self.wall_age() > Duration::from_secs(self.ttl_secs)
    }

    fn remaining_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
            .saturating_sub(self.wall_age())
            .max(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub average_response_time_ms: f64,
    pub memory_entries: usize,
    pub store: StoreHealth,
}

pub struct WarmEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub options: EntryOptions,
}

pub struct LayeredCache {
    memory: MemoryStore,
    store: Arc<GuardedStore>,
    revalidation: RevalidationQueue,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    timings_ms: Mutex<VecDeque<f64>>,
}

impl LayeredCache {
    pub fn new(
        config: &CacheConfig,
        store: Arc<GuardedStore>,
        revalidation: RevalidationQueue,
    ) -> Self {
        Self {
            memory: MemoryStore::new(config),
            store,
            revalidation,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            timings_ms: Mutex::new(VecDeque::with_capacity(TIMING_WINDOW)),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_with_age(key).await.map(|(value, _)| value)
    }

    /// Store `value` in both layers; tagged entries also record the key into
    /// each tag's member set with the same TTL. Returns whether the external
    /// store accepted the write (the memory layer always does).
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: &EntryOptions) -> bool {
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(error) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target = "voltgate::cache",
                    key,
                    error = %error,
                    "failed to serialize cache value"
                );
                return false;
            }
        };
        self.set_value(key, data, options).await
    }

    /// Cached value if present, otherwise run `loader`, store, and return.
    ///
    /// Concurrent misses for the same key are not deduplicated: two callers
    /// may both invoke the loader. Loaders must be idempotent.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        options: &EntryOptions,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = loader().await?;
        self.set(key, &value, options).await;
        Ok(value)
    }

    /// Like [`get_or_set`](Self::get_or_set), but once a cached value's age
    /// passes `options.stale_after` it is returned immediately while a
    /// detached refresh re-runs the loader. Refresh failures are logged and
    /// invisible to the caller.
    pub async fn get_stale_while_revalidate<T, E, F>(
        self: &Arc<Self>,
        key: &str,
        options: &EntryOptions,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: std::fmt::Display + Send + 'static,
        F: Fn() -> BoxFuture<'static, Result<T, E>>,
    {
        let stale_after = options.stale_after.unwrap_or(options.ttl);
        if let Some((value, age)) = self.get_with_age::<T>(key).await {
            if age > stale_after {
                let cache = Arc::clone(self);
                let refresh_key = key.to_string();
                let refresh_options = options.clone();
                let fut = loader();
                self.revalidation.enqueue(
                    key,
                    Box::pin(async move {
                        match fut.await {
                            Ok(fresh) => {
                                cache.set(&refresh_key, &fresh, &refresh_options).await;
                                Ok(())
                            }
                            Err(error) => Err(error.to_string()),
                        }
                    }),
                );
            }
            return Ok(value);
        }

        let value = loader().await?;
        self.set(key, &value, options).await;
        Ok(value)
    }

    pub async fn mget<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await);
        }
        values
    }

    /// Returns `true` only when every entry reached the external store.
    pub async fn mset<T: Serialize>(&self, entries: &[(String, T, EntryOptions)]) -> bool {
        let mut all_stored = true;
        for (key, value, options) in entries {
            all_stored &= self.set(key, value, options).await;
        }
        all_stored
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        let in_memory = self.memory.remove(key);
        let in_store = self.store.del(DATA_PREFIX, key).await;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        in_memory || in_store
    }

    /// Delete every key referenced by each tag's member set, then the set
    /// itself, then purge tagged entries from the memory layer.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> u64 {
        let mut removed = 0u64;
        for tag in tags {
            let members = self.store.smembers(TAG_PREFIX, tag).await;
            let mut store_removed = 0u64;
            for member in &members {
                if self.store.del(DATA_PREFIX, member).await {
                    store_removed += 1;
                }
            }
            self.store.del(TAG_PREFIX, tag).await;
            let memory_removed = self.memory.remove_by_tag(tag) as u64;
            removed += store_removed.max(memory_removed);
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// `*`-glob invalidation across both layers.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> u64 {
        let regex = match glob_to_regex(pattern) {
            Ok(regex) => regex,
            Err(error) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target = "voltgate::cache",
                    pattern,
                    error = %error,
                    "rejected invalid invalidation pattern"
                );
                return 0;
            }
        };
        let memory_removed = self.memory.remove_matching(&regex) as u64;
        let store_removed = self.store.del_pattern(DATA_PREFIX, pattern).await;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        store_removed.max(memory_removed)
    }

    /// Pre-populate a fixed set of entries; returns how many were stored.
    pub async fn warm(&self, entries: Vec<WarmEntry>) -> u64 {
        let mut warmed = 0u64;
        for entry in entries {
            self.set_value(&entry.key, entry.value, &entry.options).await;
            warmed += 1;
        }
        debug!(target = "voltgate::cache", count = warmed, "cache warmed");
        warmed
    }

    pub async fn clear(&self) {
        self.memory.clear();
        self.store.del_pattern(DATA_PREFIX, "*").await;
        self.store.del_pattern(TAG_PREFIX, "*").await;
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> CacheStatsSnapshot {
        let average = {
            let timings = mutex_lock(&self.timings_ms, SOURCE, "stats");
            if timings.is_empty() {
                0.0
            } else {
                timings.iter().sum::<f64>() / timings.len() as f64
            }
        };
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            average_response_time_ms: average,
            memory_entries: self.memory.len(),
            store: self.store.health().await,
        }
    }

    async fn get_with_age<T: DeserializeOwned>(&self, key: &str) -> Option<(T, Duration)> {
        let started = Instant::now();

        if let Some(entry) = self.memory.get(key) {
            match serde_json::from_str::<T>(&entry.json) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("voltgate_cache_memory_hit_total").increment(1);
                    self.record_timing(started);
                    return Some((value, entry.age()));
                }
                Err(error) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    self.memory.remove(key);
                    warn!(
                        target = "voltgate::cache",
                        key,
                        error = %error,
                        "dropping undecodable memory entry"
                    );
                }
            }
        }
        metrics::counter!("voltgate_cache_memory_miss_total").increment(1);

        if let Some(raw) = self.store.get(DATA_PREFIX, key).await {
            match serde_json::from_str::<Envelope>(&raw) {
                Ok(envelope) if !envelope.is_expired() => {
                    match serde_json::from_value::<T>(envelope.data.clone()) {
                        Ok(value) => {
                            let age = envelope.wall_age();
                            self.memory.set(
                                key,
                                envelope.data.to_string(),
                                envelope.remaining_ttl(),
                                envelope.tags.clone(),
                                envelope.version.clone(),
                            );
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            self.record_timing(started);
                            return Some((value, age));
                        }
                        Err(error) => {
                            self.errors.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                target = "voltgate::cache",
                                key,
                                error = %error,
                                "cached payload does not match requested type"
                            );
                        }
                    }
                }
                Ok(_) => {
                    // Expired but not yet reaped by the store; read as a miss.
                }
                Err(error) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        target = "voltgate::cache",
                        key,
                        error = %error,
                        "dropping undecodable store entry"
                    );
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_timing(started);
        None
    }

    async fn set_value(
        &self,
        key: &str,
        data: serde_json::Value,
        options: &EntryOptions,
    ) -> bool {
        self.memory.set(
            key,
            data.to_string(),
            options.ttl,
            options.tags.clone(),
            options.version.clone(),
        );

        let envelope = Envelope {
            data,
            stored_at_unix: OffsetDateTime::now_utc().unix_timestamp(),
            ttl_secs: options.ttl.as_secs(),
            tags: options.tags.clone(),
            version: options.version.clone(),
        };
        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(error) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target = "voltgate::cache",
                    key,
                    error = %error,
                    "failed to encode store envelope"
                );
                return false;
            }
        };

        let stored = self.store.set(DATA_PREFIX, key, &raw, options.ttl).await;
        if stored {
            for tag in &options.tags {
                self.store.sadd(TAG_PREFIX, tag, key).await;
                self.store.expire(TAG_PREFIX, tag, options.ttl).await;
            }
        }
        self.sets.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("voltgate_cache_set_total").increment(1);
        stored
    }

    fn record_timing(&self, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut timings = mutex_lock(&self.timings_ms, SOURCE, "record_timing");
        if timings.len() == TIMING_WINDOW {
            timings.pop_front();
        }
        timings.push_back(elapsed_ms);
    }
}
