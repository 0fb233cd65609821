use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod handlers;
mod metrics;
mod middleware;
mod model;
mod policy;
mod results;
mod server;
mod socket;
mod ws;

use config::Config;
use metrics::MetricsCollector;
use middleware::admission::Concurrent;
use results::ResultsStore;
use socket::{ConnectionAddrs, DescriptorCache, KernelStats, MeasuredListener};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Samples socket statistics for each running subtest.
    pub collector: MetricsCollector,

    /// Running/finished counters and recent archival records.
    pub results: Arc<ResultsStore>,

    /// Concurrent-subtest limit enforced ahead of the WebSocket upgrade.
    pub gate: Arc<Concurrent>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── 1. Configuration & logging ───────────────────────────────
    let config = Config::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        listen = %config.listen,
        max_concurrent_tests = config.max_concurrent_tests,
        "starting measurement server"
    );

    // ── 2. Build shared state ────────────────────────────────────
    let cache = Arc::new(DescriptorCache::new(config.stale_after));
    let results = Arc::new(ResultsStore::new(config.results_capacity));
    let state = Arc::new(AppState {
        collector: MetricsCollector::new(cache.clone(), Arc::new(KernelStats), results.clone()),
        results,
        gate: Arc::new(Concurrent::new(config.max_concurrent_tests)),
    });

    // ── 3. Drop descriptors nobody claimed ───────────────────────
    let pruned = cache.clone();
    let period = config.stale_after.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = pruned.prune();
            if evicted > 0 {
                debug!(evicted, remaining = pruned.len(), "descriptor cache pruned");
            }
        }
    });

    // ── 4. Build Axum router ─────────────────────────────────────
    let app = server::create_router(state);

    // ── 5. Bind & serve ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(
        MeasuredListener::new(listener, cache),
        app.into_make_service_with_connect_info::<ConnectionAddrs>(),
    )
    .await?;

    Ok(())
}
