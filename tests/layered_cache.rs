//! Layered cache semantics over an in-memory store fake.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use voltgate::cache::{CacheConfig, EntryOptions, LayeredCache, RevalidationQueue};
use voltgate::resilience::TransientError;

use common::{FakeValueStore, FlakyStore, guarded, guarded_with_breaker};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    unit: String,
    output_kw: f64,
    alarms: Vec<String>,
}

fn sample_reading() -> Reading {
    Reading {
        unit: "turbine-7".to_string(),
        output_kw: 1432.5,
        alarms: vec!["overtemp".to_string()],
    }
}

fn cache_over(store: Arc<voltgate::cache::GuardedStore>) -> Arc<LayeredCache> {
    Arc::new(LayeredCache::new(
        &CacheConfig::default(),
        store,
        RevalidationQueue::spawn(8),
    ))
}

#[tokio::test]
async fn set_then_get_roundtrips_deep_equal() {
    let cache = cache_over(guarded(Arc::new(FakeValueStore::new())));
    let reading = sample_reading();

    assert!(
        cache
            .set("readings:7", &reading, &EntryOptions::with_ttl(Duration::from_secs(60)))
            .await
    );

    let cached: Reading = cache.get("readings:7").await.expect("cached value");
    assert_eq!(cached, reading);
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_their_ttl() {
    let cache = cache_over(guarded(Arc::new(FakeValueStore::new())));

    cache
        .set(
            "readings:7",
            &sample_reading(),
            &EntryOptions::with_ttl(Duration::from_secs(60)),
        )
        .await;
    assert!(cache.get::<Reading>("readings:7").await.is_some());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(cache.get::<Reading>("readings:7").await.is_none());
}

#[tokio::test]
async fn store_hits_backfill_the_memory_layer() {
    let flaky = Arc::new(FlakyStore::new());
    let store = guarded(flaky.clone());

    // Writer instance populates the shared store.
    let writer = cache_over(store.clone());
    writer
        .set(
            "readings:7",
            &sample_reading(),
            &EntryOptions::with_ttl(Duration::from_secs(300)),
        )
        .await;

    // A second instance has a cold memory layer and must go to the store.
    let reader = cache_over(store);
    let first: Reading = reader.get("readings:7").await.expect("store hit");
    assert_eq!(first, sample_reading());

    // With the store now failing, the backfilled memory copy still serves.
    flaky.set_failing(true);
    let second: Reading = reader.get("readings:7").await.expect("memory hit");
    assert_eq!(second, sample_reading());
}

#[tokio::test]
async fn tag_invalidation_removes_every_tagged_key() {
    let cache = cache_over(guarded(Arc::new(FakeValueStore::new())));
    let options = EntryOptions::tagged(Duration::from_secs(300), vec!["units".to_string()]);

    cache.set("units:1", &1u32, &options).await;
    cache.set("units:2", &2u32, &options).await;
    cache
        .set("sites:1", &3u32, &EntryOptions::with_ttl(Duration::from_secs(300)))
        .await;

    let removed = cache.invalidate_by_tags(&["units".to_string()]).await;
    assert_eq!(removed, 2);

    assert!(cache.get::<u32>("units:1").await.is_none());
    assert!(cache.get::<u32>("units:2").await.is_none());
    assert_eq!(cache.get::<u32>("sites:1").await, Some(3));
}

#[tokio::test]
async fn pattern_invalidation_matches_globs() {
    let cache = cache_over(guarded(Arc::new(FakeValueStore::new())));
    let options = EntryOptions::with_ttl(Duration::from_secs(300));

    cache.set("units:1:detail", &1u32, &options).await;
    cache.set("units:2:detail", &2u32, &options).await;
    cache.set("reports:daily", &3u32, &options).await;

    let removed = cache.invalidate_by_pattern("units:*").await;
    assert_eq!(removed, 2);

    assert!(cache.get::<u32>("units:1:detail").await.is_none());
    assert!(cache.get::<u32>("units:2:detail").await.is_none());
    assert_eq!(cache.get::<u32>("reports:daily").await, Some(3));
}

#[tokio::test]
async fn get_or_set_loads_once_then_serves_from_cache() {
    let cache = cache_over(guarded(Arc::new(FakeValueStore::new())));
    let loads = Arc::new(AtomicU32::new(0));
    let options = EntryOptions::with_ttl(Duration::from_secs(300));

    for _ in 0..3 {
        let loads = loads.clone();
        let value: Result<Reading, TransientError> = cache
            .get_or_set("readings:7", &options, || async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(sample_reading())
            })
            .await;
        assert_eq!(value.expect("loader result"), sample_reading());
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_misses_may_both_invoke_the_loader() {
    let cache = cache_over(guarded(Arc::new(FakeValueStore::new())));
    let loads = Arc::new(AtomicU32::new(0));
    let release = Arc::new(Notify::new());

    let run = |cache: Arc<LayeredCache>, loads: Arc<AtomicU32>, release: Arc<Notify>| {
        tokio::spawn(async move {
            let options = EntryOptions::with_ttl(Duration::from_secs(300));
            let value: Result<u32, TransientError> = cache
                .get_or_set("hot-key", &options, || async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                    Ok(7)
                })
                .await;
            value.expect("loader result")
        })
    };

    let first = run(cache.clone(), loads.clone(), release.clone());
    let second = run(cache.clone(), loads.clone(), release.clone());
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    // Both callers missed and entered their loaders; this is the documented
    // no-single-flight behavior.
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    release.notify_waiters();

    assert_eq!(first.await.expect("first task"), 7);
    assert_eq!(second.await.expect("second task"), 7);
}

#[tokio::test(start_paused = true)]
async fn stale_entries_are_served_while_a_refresh_runs_behind() {
    let cache = cache_over(guarded(Arc::new(FakeValueStore::new())));
    let options = EntryOptions {
        ttl: Duration::from_secs(300),
        stale_after: Some(Duration::from_secs(30)),
        ..EntryOptions::default()
    };

    cache.set("readings:7", &1u32, &options).await;
    tokio::time::advance(Duration::from_secs(31)).await;

    let loads = Arc::new(AtomicU32::new(0));
    let counting = loads.clone();
    let stale: Result<u32, TransientError> = cache
        .get_stale_while_revalidate("readings:7", &options, move || {
            let counting = counting.clone();
            Box::pin(async move {
                counting.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
        })
        .await;

    // The stale value comes back immediately.
    assert_eq!(stale.expect("stale value"), 1);

    // The detached refresh eventually repopulates the cache.
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if cache.get::<u32>("readings:7").await == Some(2) {
            assert_eq!(loads.load(Ordering::SeqCst), 1);
            return;
        }
    }
    panic!("background refresh never landed");
}

#[tokio::test(start_paused = true)]
async fn failed_background_refresh_keeps_the_stale_value() {
    let cache = cache_over(guarded(Arc::new(FakeValueStore::new())));
    let options = EntryOptions {
        ttl: Duration::from_secs(300),
        stale_after: Some(Duration::from_secs(30)),
        ..EntryOptions::default()
    };

    cache.set("readings:7", &1u32, &options).await;
    tokio::time::advance(Duration::from_secs(31)).await;

    let stale: Result<u32, TransientError> = cache
        .get_stale_while_revalidate("readings:7", &options, || {
            Box::pin(async { Err(TransientError::Timeout("upstream died".to_string())) })
        })
        .await;
    assert_eq!(stale.expect("stale value"), 1);

    // Give the worker a chance to run the failing refresh.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.get::<u32>("readings:7").await, Some(1));
}

#[tokio::test]
async fn store_failures_degrade_to_misses_not_errors() {
    let flaky = Arc::new(FlakyStore::new());
    flaky.set_failing(true);
    let cache = cache_over(guarded(flaky));

    // Writes report the store refusal but the request survives.
    let stored = cache
        .set(
            "readings:7",
            &sample_reading(),
            &EntryOptions::with_ttl(Duration::from_secs(60)),
        )
        .await;
    assert!(!stored);

    // A cold instance read is simply a miss.
    assert!(cache.get::<Reading>("unknown").await.is_none());

    let stats = cache.stats().await;
    assert!(stats.errors > 0);
    assert!(!stats.store.connected);
}

#[tokio::test]
async fn open_breaker_short_circuits_store_calls() {
    let flaky = Arc::new(FlakyStore::new());
    flaky.set_failing(true);
    let cache = cache_over(guarded_with_breaker(flaky.clone(), 2));

    // Two failing calls trip the breaker.
    assert!(cache.get::<u32>("miss:1").await.is_none());
    assert!(cache.get::<u32>("miss:2").await.is_none());
    let calls_when_open = flaky.call_count();

    // Further reads are rejected before reaching the store.
    assert!(cache.get::<u32>("miss:3").await.is_none());
    assert!(cache.get::<u32>("miss:4").await.is_none());
    assert_eq!(flaky.call_count(), calls_when_open);
}

#[tokio::test]
async fn mget_and_mset_cover_whole_batches() {
    let cache = cache_over(guarded(Arc::new(FakeValueStore::new())));
    let options = EntryOptions::with_ttl(Duration::from_secs(300));

    let stored = cache
        .mset(&[
            ("batch:1".to_string(), 10u32, options.clone()),
            ("batch:2".to_string(), 20u32, options.clone()),
        ])
        .await;
    assert!(stored);

    let values: Vec<Option<u32>> = cache
        .mget(&[
            "batch:1".to_string(),
            "batch:missing".to_string(),
            "batch:2".to_string(),
        ])
        .await;
    assert_eq!(values, vec![Some(10), None, Some(20)]);
}

#[tokio::test]
async fn clear_empties_both_layers() {
    let cache = cache_over(guarded(Arc::new(FakeValueStore::new())));
    let options = EntryOptions::with_ttl(Duration::from_secs(300));

    cache.set("a", &1u32, &options).await;
    cache.set("b", &2u32, &options).await;

    cache.clear().await;

    assert!(cache.get::<u32>("a").await.is_none());
    assert!(cache.get::<u32>("b").await.is_none());
    assert_eq!(cache.stats().await.memory_entries, 0);
}
