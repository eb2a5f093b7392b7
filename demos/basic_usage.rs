//! Basic usage example of the data-access cache.

use flight_cache::marker::InMemoryMarkerStore;
use flight_cache::observability::CounterMetrics;
use flight_cache::{
    error::Result, CacheConfig, CacheService, Error, Preloader, SessionEvent, SessionGuard,
    SharedSource,
};
use std::sync::Arc;
use std::time::Duration;

/// Example value: a project on the staffing calendar
#[derive(Clone, Debug)]
struct Project {
    id: String,
    title: String,
    crew_needed: u32,
}

/// Mock backend call that simulates network latency
async fn fetch_projects_by_month((year, month): (i32, u32)) -> Result<Vec<Project>> {
    println!("  [API] Fetching projects for {}-{:02}", year, month);
    tokio::time::sleep(Duration::from_millis(150)).await;

    Ok(vec![
        Project {
            id: format!("p-{}{:02}-1", year, month),
            title: "Product launch".to_string(),
            crew_needed: 12,
        },
        Project {
            id: format!("p-{}{:02}-2", year, month),
            title: "Trade fair".to_string(),
            crew_needed: 30,
        },
    ])
}

async fn fetch_notifications(_: ()) -> Result<Vec<String>> {
    println!("  [API] Fetching notifications");
    Err(Error::FetchError("notification service unavailable".to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== flight-cache - Basic Example ===\n");

    // 1. Initialize the cache service
    println!("1. Initializing cache service...");
    let metrics = Arc::new(CounterMetrics::new());
    let cache = CacheService::with_metrics(CacheConfig::default(), metrics.clone())?;
    let sweeper = cache.start_sweeper();

    let guard = SessionGuard::new(cache.clone(), Arc::new(InMemoryMarkerStore::new()));
    guard.check_version()?;
    guard.observe(&SessionEvent::signed_in("session-alice"))?;
    println!("   ✓ Cache ready, scoped to session-alice\n");

    // 2. Preload at startup
    println!("2. Preloading startup data:");
    let by_month: SharedSource<(i32, u32), Vec<Project>> = Arc::new(fetch_projects_by_month);
    let notifications: SharedSource<(), Vec<String>> = Arc::new(fetch_notifications);

    let report = Preloader::new()
        .task_with_follow_up(
            "projectsByMonth",
            by_month.clone(),
            (2026, 10),
            vec![(2026, 9), (2026, 11)],
            Duration::from_millis(200),
        )
        .task("notifications", notifications, ())
        .run(&cache)
        .await;

    for (namespace, ok) in report.summary() {
        println!("   {} {}", if ok { "✓" } else { "✗" }, namespace);
    }
    println!();

    // 3. Consumers resolve through a namespace handle
    println!("3. Calendar view requests October (preloaded):");
    let calendar = cache.namespace("projectsByMonth", by_month);
    let october = calendar.resolve((2026, 10)).await?;
    println!("   ✓ {} projects served from memory", october.len());
    for project in &october {
        println!("     {} {} (crew {})", project.id, project.title, project.crew_needed);
    }
    println!();

    // 4. Many widgets asking for the same month at once share one fetch
    println!("4. Five widgets request December concurrently:");
    let misses_before = metrics.snapshot().misses;
    let results = futures::future::join_all((0..5).map(|_| calendar.resolve((2026, 12)))).await;
    println!(
        "   ✓ {} results from {} fetch\n",
        results.iter().filter(|r| r.is_ok()).count(),
        metrics.snapshot().misses - misses_before
    );

    // 5. Sign-out empties everything
    println!("5. Signing out:");
    guard.observe(&SessionEvent::signed_out())?;
    println!("   ✓ Entries left: {}\n", cache.stats().total_entries);

    let stats = metrics.snapshot();
    println!(
        "Stats: {} hits, {} misses, {} joins, hit rate {:.1}%",
        stats.hits,
        stats.misses,
        stats.joins,
        stats.hit_rate()
    );

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    cache.shutdown();
    Ok(())
}
