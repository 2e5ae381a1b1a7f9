//! Guarded facade over the key-value store.
//!
//! Every call crosses the network through the `cache-store` circuit breaker
//! and the retry executor. Callers never see an error from here: an
//! unavailable store reads as a miss (`None`), a failed write as `false`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::resilience::{
    BreakerError, CircuitBreaker, RetryExecutor, RetryPolicy, TransientError,
};

use super::store::{StoreStats, ValueStore};

/// Adapter-level view combined from store stats and local counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreHealth {
    pub connected: bool,
    pub memory_used_bytes: Option<u64>,
    pub key_count: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

pub struct GuardedStore {
    store: Arc<dyn ValueStore>,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryExecutor>,
    policy: RetryPolicy,
    namespace: String,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl GuardedStore {
    pub fn new(
        store: Arc<dyn ValueStore>,
        breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryExecutor>,
        policy: RetryPolicy,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            breaker,
            retry,
            policy,
            namespace: namespace.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Keys are partitioned as `{namespace}:{prefix}:{key}` so logical
    /// domains (sessions, data entries, tag sets) never collide.
    pub fn namespaced(&self, prefix: &str, key: &str) -> String {
        format!("{}:{prefix}:{key}", self.namespace)
    }

    pub async fn get(&self, prefix: &str, key: &str) -> Option<String> {
        let full = self.namespaced(prefix, key);
        let result = self
            .run("store.get", || {
                let store = self.store.clone();
                let full = full.clone();
                async move { store.get(&full).await }
            })
            .await
            .flatten();
        match result {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("voltgate_cache_store_hit_total").increment(1);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("voltgate_cache_store_miss_total").increment(1);
                None
            }
        }
    }

    pub async fn set(&self, prefix: &str, key: &str, value: &str, ttl: Duration) -> bool {
        let full = self.namespaced(prefix, key);
        self.run("store.set", || {
            let store = self.store.clone();
            let full = full.clone();
            let value = value.to_string();
            async move { store.set(&full, &value, ttl).await }
        })
        .await
        .is_some()
    }

    pub async fn del(&self, prefix: &str, key: &str) -> bool {
        let full = self.namespaced(prefix, key);
        self.run("store.del", || {
            let store = self.store.clone();
            let full = full.clone();
            async move { store.del(&full).await }
        })
        .await
        .unwrap_or(false)
    }

    /// `pattern` is a `*` glob over un-namespaced keys within `prefix`.
    pub async fn del_pattern(&self, prefix: &str, pattern: &str) -> u64 {
        let full = self.namespaced(prefix, pattern);
        self.run("store.del_pattern", || {
            let store = self.store.clone();
            let full = full.clone();
            async move { store.del_pattern(&full).await }
        })
        .await
        .unwrap_or(0)
    }

    pub async fn exists(&self, prefix: &str, key: &str) -> bool {
        let full = self.namespaced(prefix, key);
        self.run("store.exists", || {
            let store = self.store.clone();
            let full = full.clone();
            async move { store.exists(&full).await }
        })
        .await
        .unwrap_or(false)
    }

    pub async fn ttl(&self, prefix: &str, key: &str) -> Option<Duration> {
        let full = self.namespaced(prefix, key);
        self.run("store.ttl", || {
            let store = self.store.clone();
            let full = full.clone();
            async move { store.ttl(&full).await }
        })
        .await
        .flatten()
    }

    /// Returns the incremented counter, or `None` when the store is away —
    /// callers treating the counter as a quota must fail open.
    pub async fn incr(&self, prefix: &str, key: &str) -> Option<i64> {
        let full = self.namespaced(prefix, key);
        self.run("store.incr", || {
            let store = self.store.clone();
            let full = full.clone();
            async move { store.incr(&full).await }
        })
        .await
    }

    pub async fn expire(&self, prefix: &str, key: &str, ttl: Duration) -> bool {
        let full = self.namespaced(prefix, key);
        self.run("store.expire", || {
            let store = self.store.clone();
            let full = full.clone();
            async move { store.expire(&full, ttl).await }
        })
        .await
        .unwrap_or(false)
    }

    pub async fn sadd(&self, prefix: &str, key: &str, member: &str) -> bool {
        let full = self.namespaced(prefix, key);
        self.run("store.sadd", || {
            let store = self.store.clone();
            let full = full.clone();
            let member = member.to_string();
            async move { store.sadd(&full, &member).await }
        })
        .await
        .is_some()
    }

    pub async fn smembers(&self, prefix: &str, key: &str) -> Vec<String> {
        let full = self.namespaced(prefix, key);
        self.run("store.smembers", || {
            let store = self.store.clone();
            let full = full.clone();
            async move { store.smembers(&full).await }
        })
        .await
        .unwrap_or_default()
    }

    pub async fn health(&self) -> StoreHealth {
        let stats: Option<StoreStats> = self
            .run("store.stats", || {
                let store = self.store.clone();
                async move { store.stats().await }
            })
            .await;
        let connected = stats.as_ref().map(|s| s.connected).unwrap_or(false);
        StoreHealth {
            connected,
            memory_used_bytes: stats.as_ref().and_then(|s| s.memory_used_bytes),
            key_count: stats.map(|s| s.key_count).unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, mut make: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransientError>>,
    {
        let outcome = self
            .breaker
            .execute(|| async {
                self.retry
                    .execute(operation, &self.policy, &mut make)
                    .await
                    .map_err(|err| err.into_transient())
            })
            .await;
        match outcome {
            Ok(value) => Some(value),
            Err(BreakerError::Open { retry_in, .. }) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target = "voltgate::cache",
                    operation,
                    retry_in_secs = retry_in.as_secs(),
                    "store call rejected while breaker is open"
                );
                None
            }
            Err(BreakerError::Inner(error)) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("voltgate_cache_store_error_total").increment(1);
                debug!(
                    target = "voltgate::cache",
                    operation,
                    error = %error,
                    "store call failed, degrading to miss"
                );
                None
            }
        }
    }
}
