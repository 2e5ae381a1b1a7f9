//! In-process cache layer.
//!
//! Bounded map with lazy TTL expiry on read. When the entry limit is
//! exceeded the oldest-inserted entry is evicted first; re-setting a key
//! counts as a fresh insertion.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;

use super::config::CacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::memory";

#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// JSON-encoded value, the same representation the external store holds.
    pub json: String,
    pub stored_at: Instant,
    pub ttl: Duration,
    pub tags: Vec<String>,
    pub version: Option<String>,
    epoch: u64,
}

impl MemoryEntry {
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    fn is_expired(&self) -> bool {
        self.age() > self.ttl
    }
}

struct Inner {
    entries: HashMap<String, MemoryEntry>,
    /// Insertion order as (key, epoch); stale pairs are skipped on eviction.
    order: VecDeque<(String, u64)>,
    next_epoch: u64,
}

pub struct MemoryStore {
    limit: usize,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            limit: config.memory_limit_non_zero().get(),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_epoch: 0,
            }),
        }
    }

    /// Fetch a live entry; expired entries are removed on the way out.
    pub fn get(&self, key: &str) -> Option<MemoryEntry> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "get");
        if inner.entries.get(key).is_some_and(MemoryEntry::is_expired) {
            inner.entries.remove(key);
            return None;
        }
        inner.entries.get(key).cloned()
    }

    pub fn set(
        &self,
        key: &str,
        json: String,
        ttl: Duration,
        tags: Vec<String>,
        version: Option<String>,
    ) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "set");
        let epoch = inner.next_epoch;
        inner.next_epoch += 1;
        inner.entries.insert(
            key.to_string(),
            MemoryEntry {
                json,
                stored_at: Instant::now(),
                ttl,
                tags,
                version,
                epoch,
            },
        );
        inner.order.push_back((key.to_string(), epoch));
        Self::evict_over_limit(&mut inner, self.limit);
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = mutex_lock(&self.inner, SOURCE, "remove");
        inner.entries.remove(key).is_some()
    }

    /// Drop every entry tagged with `tag`; returns how many were removed.
    pub fn remove_by_tag(&self, tag: &str) -> usize {
        let mut inner = mutex_lock(&self.inner, SOURCE, "remove_by_tag");
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.tags.iter().any(|t| t == tag))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            inner.entries.remove(key);
        }
        keys.len()
    }

    pub fn remove_matching(&self, pattern: &Regex) -> usize {
        let mut inner = mutex_lock(&self.inner, SOURCE, "remove_matching");
        let keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();
        for key in &keys {
            inner.entries.remove(key);
        }
        keys.len()
    }

    pub fn clear(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "clear");
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.inner, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_over_limit(inner: &mut Inner, limit: usize) {
        while inner.entries.len() > limit {
            let Some((key, epoch)) = inner.order.pop_front() else {
                break;
            };
            // Skip ring slots left behind by removals or re-inserts.
            let current = inner.entries.get(&key).map(|entry| entry.epoch);
            if current == Some(epoch) {
                inner.entries.remove(&key);
                metrics::counter!("voltgate_cache_memory_evict_total").increment(1);
            }
        }
    }
}
