//! Result cache tests.
//!
//! Tests cover: idempotent hits with no extra reads, collapsing concurrent
//! duplicates, error and cancellation handling, key canonicalisation.

use chrono::{NaiveDate, NaiveDateTime};
use staking_metrics_core::{
    config::MetricsConfig,
    error::MetricsError,
    metrics::StakingMetrics,
    query::{QueryParams, TimeBucket},
    result_cache::{CacheKey, CancelToken, ResultCache},
    source::EventSource,
    store::WarehouseStore,
    types::{StakingAction, StakingEvent},
};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Barrier,
};
use std::thread;
use std::time::Duration;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn ts(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(8, 0, 0).unwrap()
}

fn event(date: NaiveDate, tx: &str, delegator: &str, action: StakingAction, amount: u64) -> StakingEvent {
    StakingEvent {
        timestamp: ts(date),
        tx_id: tx.into(),
        entity_address: delegator.into(),
        validator_address: "axelarvaloper1aaa".into(),
        action,
        amount,
        currency: "uaxl".into(),
        success: true,
        source_validator: None,
    }
}

fn metrics_with_ledger() -> StakingMetrics<WarehouseStore> {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = MetricsConfig::default_test();
    let store = WarehouseStore::in_memory(&config).expect("open warehouse");
    store.migrate().expect("migrate");
    store
        .insert_events(&[
            event(date(2024, 1, 1), "t1", "axelar1a", StakingAction::Delegate, 5_000_000),
            event(date(2024, 1, 2), "t2", "axelar1b", StakingAction::Delegate, 7_000_000),
            event(date(2024, 1, 9), "t3", "axelar1a", StakingAction::ClaimReward, 100_000),
        ])
        .expect("insert");
    StakingMetrics::new(Arc::new(store), config)
}

fn january() -> QueryParams {
    QueryParams::new(TimeBucket::Week, date(2024, 1, 1), date(2024, 1, 31)).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// A repeated query returns the same value and never reaches the source again.
#[test]
fn repeated_query_is_served_from_cache() {
    let metrics = metrics_with_ledger();
    let params = january();

    let first = metrics.delegation_over_time(&params).unwrap();
    let reads = metrics.source().queries_issued();
    assert_eq!(reads, 1);

    let second = metrics.delegation_over_time(&params).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*first, *second);
    assert_eq!(metrics.source().queries_issued(), reads, "cache hit issued a read");

    let stats = metrics.cache_stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
}

/// Different parameters are different keys.
#[test]
fn different_parameters_are_cached_separately() {
    let metrics = metrics_with_ledger();
    let weekly = january();
    let daily = QueryParams { time_bucket: TimeBucket::Day, ..weekly };

    metrics.delegation_over_time(&weekly).unwrap();
    metrics.delegation_over_time(&daily).unwrap();
    assert_eq!(metrics.source().queries_issued(), 2);
    assert_eq!(metrics.cache_stats().entries, 2);

    metrics.clear_cache();
    metrics.delegation_over_time(&weekly).unwrap();
    assert_eq!(metrics.source().queries_issued(), 3);
}

/// Concurrent identical requests run the computation once.
#[test]
fn concurrent_duplicates_collapse_to_one_computation() {
    let cache = Arc::new(ResultCache::new());
    let computations = Arc::new(AtomicU32::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let computations = Arc::clone(&computations);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_compute(CacheKey::new("slow").param(date(2024, 1, 1)), None, || {
                        computations.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(vec![1u64, 2, 3])
                    })
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<Arc<Vec<u64>>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(computations.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
}

/// A failed computation is not stored; the next caller recomputes.
#[test]
fn errors_are_not_cached() {
    let cache = ResultCache::new();
    let key = CacheKey::new("flaky");

    let err = cache
        .get_or_compute::<u32, _>(key.clone(), None, || {
            Err(MetricsError::SourceUnavailable { attempts: 3, reason: "down".into() })
        })
        .unwrap_err();
    assert!(matches!(err, MetricsError::SourceUnavailable { .. }));
    assert!(!cache.contains(&key));
    assert_eq!(cache.stats().in_flight, 0, "failed key left an empty slot");

    let value = cache.get_or_compute(key.clone(), None, || Ok(42u32)).unwrap();
    assert_eq!(*value, 42);
    assert!(cache.contains(&key));
}

/// A cancelled render neither computes nor commits.
#[test]
fn cancelled_render_does_not_commit() {
    let cache = ResultCache::new();
    let key = CacheKey::new("panel");

    let cancelled = CancelToken::new();
    cancelled.cancel();
    let err = cache
        .get_or_compute(key.clone(), Some(&cancelled), || Ok(1u8))
        .unwrap_err();
    assert!(matches!(err, MetricsError::Cancelled));
    assert_eq!(cache.stats().in_flight, 0);

    // Cancelled while computing: the caller gets its value, the cache stays empty.
    let token = CancelToken::new();
    let value = cache
        .get_or_compute(key.clone(), Some(&token), || {
            token.cancel();
            Ok(2u8)
        })
        .unwrap();
    assert_eq!(*value, 2);
    assert!(!cache.contains(&key));
    let stats = cache.stats();
    assert_eq!((stats.entries, stats.in_flight), (0, 0));
}

/// A caller waiting on a key whose computation fails runs its own and stores it.
#[test]
fn waiting_caller_takes_over_after_failure() {
    let cache = Arc::new(ResultCache::new());
    let started = Arc::new(Barrier::new(2));
    let key = CacheKey::new("handoff");

    let failing = {
        let cache = Arc::clone(&cache);
        let started = Arc::clone(&started);
        let key = key.clone();
        thread::spawn(move || {
            cache.get_or_compute::<u32, _>(key, None, || {
                started.wait();
                thread::sleep(Duration::from_millis(50));
                Err(MetricsError::SourceUnavailable { attempts: 3, reason: "down".into() })
            })
        })
    };

    started.wait();
    let value = cache.get_or_compute(key.clone(), None, || Ok(9u32)).unwrap();
    assert!(failing.join().unwrap().is_err());
    assert_eq!(*value, 9);

    let stats = cache.stats();
    assert_eq!((stats.entries, stats.in_flight), (1, 0));
    assert!(cache.contains(&key));
}

/// Reading a key back as a different type is reported, not a panic.
#[test]
fn type_mismatch_is_reported() {
    let cache = ResultCache::new();
    let key = CacheKey::new("typed");
    cache.get_or_compute(key.clone(), None, || Ok(String::from("x"))).unwrap();
    let err = cache.get_or_compute(key, None, || Ok(1u64)).unwrap_err();
    assert!(matches!(err, MetricsError::CacheTypeMismatch { .. }));
}

/// Keys canonicalise parameters: dates render as ISO strings.
#[test]
fn keys_are_canonical() {
    let a = CacheKey::new("q").params(&january());
    let b = CacheKey::new("q")
        .param(TimeBucket::Week)
        .param("2024-01-01")
        .param(String::from("2024-01-31"));
    assert_eq!(a, b);
    assert_ne!(a, CacheKey::new("other").params(&january()));
}
