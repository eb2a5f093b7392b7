//! Integration tests for flight-cache
//!
//! These tests verify end-to-end cache behavior across all components.

use flight_cache::marker::{FileMarkerStore, InMemoryMarkerStore, MarkerStore, VERSION_MARKER};
use flight_cache::observability::CounterMetrics;
use flight_cache::{
    CacheConfig, CacheService, Error, Preloader, Result, SessionEvent, SessionEventKind,
    SessionGuard, SharedSource,
};
use futures::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq)]
struct Widgets {
    count: u32,
}

#[derive(Clone, Debug, PartialEq)]
struct Shift {
    id: u64,
    staff: String,
    confirmed: bool,
}

#[derive(Clone, Debug, Serialize)]
struct ShiftFilter {
    status: String,
    region: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
enum Reading {
    Count { count: u32 },
    Label(String),
}

/// Source that counts invocations and settles after `delay`.
fn counted<T: Clone + Send + Sync + 'static>(
    calls: Arc<AtomicUsize>,
    delay: Duration,
    value: T,
) -> impl Fn(()) -> BoxFuture<'static, Result<T>> + Send + Sync {
    move |_: ()| {
        calls.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok(value)
        }
        .boxed()
    }
}

fn service() -> CacheService {
    CacheService::new(CacheConfig::default().with_sweep_interval(None)).expect("valid config")
}

// ============================================================================
// Single-flight
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_resolves_invoke_fetch_once() {
    let metrics = Arc::new(CounterMetrics::new());
    let cache = CacheService::with_metrics(CacheConfig::default(), metrics.clone()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let widgets = counted(calls.clone(), Duration::from_millis(100), Widgets { count: 3 });
    let ttl = Duration::from_secs(5);

    let results: Vec<Result<Widgets>> =
        future::join_all((0..32).map(|_| cache.resolve("widgets", &widgets, (), ttl))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result, Ok(Widgets { count: 3 }));
    }

    let stats = metrics.snapshot();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.joins, 31);
    assert_eq!(stats.fetches, 1);
}

#[tokio::test]
async fn test_concurrent_resolves_across_tasks() {
    let cache = service();
    let calls = Arc::new(AtomicUsize::new(0));
    let shifts: SharedSource<(u64,), Shift> = {
        let calls = calls.clone();
        Arc::new(move |(id,): (u64,)| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, Error>(Shift {
                    id,
                    staff: "ana".into(),
                    confirmed: true,
                })
            }
        })
    };

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let handle = cache.namespace("shifts", shifts.clone());
            tokio::spawn(async move { handle.resolve((7,)).await })
        })
        .collect();

    for handle in handles {
        let shift = handle.await.expect("Task failed").expect("resolve failed");
        assert_eq!(shift.id, 7);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_fetch_independently() {
    let cache = service();
    let calls = Arc::new(AtomicUsize::new(0));
    let by_id = {
        let calls = calls.clone();
        move |id: u64| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Error>(id * 2) }
        }
    };
    let ttl = Duration::from_secs(60);

    let (a, b): (Result<u64>, Result<u64>) = tokio::join!(
        cache.resolve("doubles", &by_id, 1u64, ttl),
        cache.resolve("doubles", &by_id, 2u64, ttl),
    );
    assert_eq!((a, b), (Ok(2), Ok(4)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// TTL
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_widgets_timeline() {
    let cache = service();
    let calls = Arc::new(AtomicUsize::new(0));
    let widgets = counted(calls.clone(), Duration::from_millis(100), Widgets { count: 3 });
    let ttl = Duration::from_millis(5000);
    let t0 = Instant::now();

    // t=0 starts the fetch, t=10 joins it
    let (first, second): (Result<Widgets>, Result<Widgets>) = tokio::join!(
        cache.resolve("widgets", &widgets, (), ttl),
        async {
            tokio::time::sleep_until(t0 + Duration::from_millis(10)).await;
            cache.resolve("widgets", &widgets, (), ttl).await
        }
    );
    assert_eq!(first, Ok(Widgets { count: 3 }));
    assert_eq!(second, Ok(Widgets { count: 3 }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // t=4999 is served from memory
    tokio::time::advance((t0 + Duration::from_millis(4999)) - Instant::now()).await;
    let third: Widgets = cache.resolve("widgets", &widgets, (), ttl).await.unwrap();
    assert_eq!(third, Widgets { count: 3 });
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // t=5001 refetches
    tokio::time::advance(Duration::from_millis(2)).await;
    let fourth: Widgets = cache.resolve("widgets", &widgets, (), ttl).await.unwrap();
    assert_eq!(fourth, Widgets { count: 3 });
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_hit_does_not_suspend() {
    let cache = service();
    let calls = Arc::new(AtomicUsize::new(0));
    let widgets = counted(calls.clone(), Duration::from_millis(100), Widgets { count: 1 });
    let ttl = Duration::from_secs(60);

    let _: Widgets = cache.resolve("widgets", &widgets, (), ttl).await.unwrap();

    let hit = cache.resolve::<(), Widgets, _>("widgets", &widgets, (), ttl);
    let ready = hit.now_or_never().expect("cache hit must complete on first poll");
    assert_eq!(ready, Ok(Widgets { count: 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_keeps_entries_fresh_under_their_own_ttl() {
    let config = CacheConfig::default()
        .with_default_ttl(Duration::from_secs(10))
        .with_sweep_interval(Some(Duration::from_secs(60)));
    let cache = CacheService::new(config).unwrap();
    let sweeper = cache.start_sweeper().expect("sweeper enabled");

    let long_calls = Arc::new(AtomicUsize::new(0));
    let long_source: SharedSource<(), Widgets> = Arc::new(counted(
        long_calls.clone(),
        Duration::ZERO,
        Widgets { count: 1 },
    ));
    let hourly = cache
        .namespace("hourly", long_source)
        .with_ttl(Duration::from_secs(3600));

    let short_calls = Arc::new(AtomicUsize::new(0));
    let short_source: SharedSource<(), Widgets> = Arc::new(counted(
        short_calls.clone(),
        Duration::ZERO,
        Widgets { count: 2 },
    ));
    let ticker = cache.namespace("ticker", short_source);

    hourly.resolve(()).await.unwrap();
    ticker.resolve(()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(cache.stats().total_entries, 1);

    hourly.resolve(()).await.unwrap();
    ticker.resolve(()).await.unwrap();
    assert_eq!(long_calls.load(Ordering::SeqCst), 1);
    assert_eq!(short_calls.load(Ordering::SeqCst), 2);

    sweeper.abort();
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_served_while_refreshing() {
    let cache = CacheService::new(
        CacheConfig::default()
            .with_sweep_interval(None)
            .with_stale_after(Duration::from_secs(60)),
    )
    .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let source: SharedSource<(), Widgets> = Arc::new(counted(
        calls.clone(),
        Duration::from_millis(100),
        Widgets { count: 4 },
    ));
    let widgets = cache
        .namespace("widgets", source)
        .with_ttl(Duration::from_secs(300));

    widgets.resolve(()).await.unwrap();
    tokio::time::advance(Duration::from_secs(90)).await;

    let stale = widgets.resolve(()).now_or_never().expect("stale hit must not suspend");
    assert_eq!(stale, Ok(Widgets { count: 4 }));
    assert!(widgets.is_loading());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!widgets.is_loading());
    widgets.resolve(()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Values
// ============================================================================

#[tokio::test]
async fn test_json_shaped_rows_are_cached() {
    let cache = service();
    let ttl = Duration::from_secs(60);
    let calls = Arc::new(AtomicUsize::new(0));
    let rows = counted(calls.clone(), Duration::ZERO, serde_json::json!({"count": 3}));

    let first: serde_json::Value = cache.resolve("widgets", &rows, (), ttl).await.unwrap();
    let second: serde_json::Value = cache.resolve("widgets", &rows, (), ttl).await.unwrap();
    assert_eq!(first, serde_json::json!({"count": 3}));
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let reading: Reading = serde_json::from_value(first).unwrap();
    assert_eq!(reading, Reading::Count { count: 3 });
    let readings = counted(calls.clone(), Duration::ZERO, reading.clone());

    let a: Reading = cache.resolve("readings", &readings, (), ttl).await.unwrap();
    let b: Reading = cache.resolve("readings", &readings, (), ttl).await.unwrap();
    assert_eq!(a, reading);
    assert_eq!(b, reading);
    assert_ne!(b, Reading::Label("3".into()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Keys
// ============================================================================

#[tokio::test]
async fn test_field_order_does_not_split_entries() {
    let cache = service();
    let calls = Arc::new(AtomicUsize::new(0));
    let search = {
        let calls = calls.clone();
        move |_filter: serde_json::Value| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(vec![1u64, 2, 3]) }
        }
    };
    let ttl = Duration::from_secs(60);

    let ab: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
    let ba: serde_json::Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();

    let first: Vec<u64> = cache.resolve("search", &search, ab, ttl).await.unwrap();
    let second: Vec<u64> = cache.resolve("search", &search, ba, ttl).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_struct_and_map_arguments_share_a_key() {
    let cache = service();
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_secs(60);

    let by_filter = {
        let calls = calls.clone();
        move |_: (ShiftFilter,)| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(5u32) }
        }
    };
    let by_map = {
        let calls = calls.clone();
        move |_: (HashMap<String, String>,)| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(5u32) }
        }
    };

    let filter = ShiftFilter {
        status: "open".into(),
        region: "north".into(),
    };
    let mut map = HashMap::new();
    map.insert("region".to_string(), "north".to_string());
    map.insert("status".to_string(), "open".to_string());

    let _: u32 = cache.resolve("open", &by_filter, (filter,), ttl).await.unwrap();
    let _: u32 = cache.resolve("open", &by_map, (map,), ttl).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_failed_fetch_is_not_replayed() {
    let cache = service();
    let calls = Arc::new(AtomicUsize::new(0));
    let flaky = {
        let calls = calls.clone();
        move |_: ()| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(Error::FetchError("connection reset".into()))
                } else {
                    Ok(Widgets { count: 9 })
                }
            }
        }
    };
    let ttl = Duration::from_secs(60);

    let first: Result<Widgets> = cache.resolve("widgets", &flaky, (), ttl).await;
    assert_eq!(first, Err(Error::FetchError("connection reset".into())));
    assert_eq!(cache.store().len("widgets"), 0);
    assert!(!cache.is_loading("widgets"));

    let second: Result<Widgets> = cache.resolve("widgets", &flaky, (), ttl).await;
    assert_eq!(second, Ok(Widgets { count: 9 }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Session scoping
// ============================================================================

#[tokio::test]
async fn test_sign_out_forces_refetch() {
    let cache = service();
    let markers = Arc::new(InMemoryMarkerStore::new());
    let guard = SessionGuard::new(cache.clone(), markers.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let widgets = counted(calls.clone(), Duration::ZERO, Widgets { count: 3 });
    let ttl = Duration::from_secs(60);

    guard.observe(&SessionEvent::signed_in("alice")).unwrap();
    let _: Widgets = cache.resolve("widgets", &widgets, (), ttl).await.unwrap();
    let _: Widgets = cache.resolve("widgets", &widgets, (), ttl).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    guard.observe(&SessionEvent::signed_out()).unwrap();
    let _: Widgets = cache.resolve("widgets", &widgets, (), ttl).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_session_feed_identity_switch() {
    let cache = service();
    let markers = Arc::new(InMemoryMarkerStore::new());
    let (tx, rx) = broadcast::channel(16);
    let watcher = SessionGuard::new(cache.clone(), markers.clone()).watch(rx);

    let calls = Arc::new(AtomicUsize::new(0));
    let widgets = counted(calls.clone(), Duration::ZERO, Widgets { count: 3 });
    let ttl = Duration::from_secs(60);

    tx.send(SessionEvent::new(SessionEventKind::InitialSession, Some("alice".into())))
        .unwrap();
    tx.send(SessionEvent::new(SessionEventKind::TokenRefreshed, Some("bob".into())))
        .unwrap();
    drop(tx);
    watcher.await.unwrap();

    assert_eq!(
        markers.get(flight_cache::marker::SESSION_MARKER).unwrap(),
        Some("bob".to_string())
    );

    let _: Widgets = cache.resolve("widgets", &widgets, (), ttl).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_flush_during_fetch_discards_late_value() {
    let cache = service();
    let calls = Arc::new(AtomicUsize::new(0));
    let widgets = counted(calls.clone(), Duration::from_millis(100), Widgets { count: 3 });
    let ttl = Duration::from_secs(60);

    cache.warm::<(), Widgets, _>("widgets", &widgets, (), ttl).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    SessionGuard::new(cache.clone(), Arc::new(InMemoryMarkerStore::new()))
        .observe(&SessionEvent::signed_out())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cache.store().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_version_marker_on_disk() {
    let path = std::env::temp_dir().join(format!("flight-cache-it-{}.json", uuid::Uuid::now_v7()));
    let markers: Arc<dyn MarkerStore> = Arc::new(FileMarkerStore::new(&path));
    markers.set(VERSION_MARKER, "0.0.1").unwrap();

    let cache = service();
    let calls = Arc::new(AtomicUsize::new(0));
    let widgets = counted(calls.clone(), Duration::ZERO, Widgets { count: 3 });
    let _: Widgets = cache
        .resolve("widgets", &widgets, (), Duration::from_secs(60))
        .await
        .unwrap();

    let guard = SessionGuard::new(cache.clone(), markers.clone());
    assert!(guard.check_version().unwrap());
    assert!(cache.store().is_empty());

    // next startup with the same build keeps the cache
    let restarted = SessionGuard::new(cache.clone(), Arc::new(FileMarkerStore::new(&path)));
    assert!(!restarted.check_version().unwrap());
    assert_eq!(
        markers.get(VERSION_MARKER).unwrap().as_deref(),
        Some(cache.config().cache_version.as_str())
    );

    let _ = std::fs::remove_file(path);
}

// ============================================================================
// Watchdog
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stuck_fetch_stops_loading_at_bound() {
    let config = CacheConfig::default().with_watchdog_timeout(Duration::from_secs(30));
    let cache = CacheService::new(config).unwrap();
    let stuck: SharedSource<(), Widgets> =
        Arc::new(|_: ()| future::pending::<Result<Widgets>>());
    let handle = Arc::new(cache.namespace("widgets", stuck));

    let waiter = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.resolve(()).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(handle.is_loading());
    assert!(cache.is_loading("widgets"));

    tokio::time::sleep(Duration::from_secs(29)).await;
    let outcome = waiter.await.unwrap();
    assert!(matches!(outcome, Err(Error::Timeout(_))));
    assert!(!handle.is_loading());
    assert!(!cache.is_loading("widgets"));
}

#[tokio::test(start_paused = true)]
async fn test_joiners_all_time_out_together() {
    let config = CacheConfig::default().with_watchdog_timeout(Duration::from_secs(30));
    let cache = CacheService::new(config).unwrap();
    let slow: SharedSource<(), Widgets> = Arc::new(|_: ()| async {
        tokio::time::sleep(Duration::from_secs(40)).await;
        Ok::<_, Error>(Widgets { count: 8 })
    });
    let ttl = Duration::from_secs(600);

    let results: Vec<Result<Widgets>> =
        future::join_all((0..4).map(|_| cache.resolve("widgets", &*slow, (), ttl))).await;
    assert!(results.iter().all(|r| matches!(r, Err(Error::Timeout(_)))));

    // the late value still lands
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(cache.store().len("widgets"), 1);
    let value: Widgets = cache.resolve("widgets", &*slow, (), ttl).await.unwrap();
    assert_eq!(value, Widgets { count: 8 });
}

// ============================================================================
// Preloading
// ============================================================================

#[tokio::test]
async fn test_startup_sequence() {
    let cache = service();
    let markers = Arc::new(InMemoryMarkerStore::new());
    let guard = SessionGuard::new(cache.clone(), markers);
    assert!(guard.check_version().unwrap());

    let projects: SharedSource<(), Vec<String>> =
        Arc::new(|_: ()| async { Ok::<_, Error>(vec!["Gala".to_string()]) });
    let by_month: SharedSource<(i32, u32), Vec<String>> =
        Arc::new(|(year, month): (i32, u32)| async move {
            Ok::<_, Error>(vec![format!("{}-{:02}", year, month)])
        });
    let notifications: SharedSource<(), Vec<String>> =
        Arc::new(|_: ()| async { Err::<Vec<String>, _>(Error::FetchError("503".into())) });

    let report = Preloader::new()
        .task("projects", projects.clone(), ())
        .task("projectsByMonth", by_month.clone(), (2026, 10))
        .task("notifications", notifications, ())
        .run(&cache)
        .await;

    let summary = report.summary();
    assert_eq!(summary.get("projects"), Some(&true));
    assert_eq!(summary.get("projectsByMonth"), Some(&true));
    assert_eq!(summary.get("notifications"), Some(&false));

    // consumers now hit memory
    let month = cache.namespace("projectsByMonth", by_month);
    assert_eq!(month.resolve((2026, 10)).await.unwrap(), vec!["2026-10".to_string()]);
    assert_eq!(cache.stats().total_entries, 2);
}
