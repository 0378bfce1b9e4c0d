use std::sync::Arc;

use common::logger::init_logger;
use latency::{
    api::{ApiGateway, CachedPayload, ClientCache, RateLimiter, UpstreamClient},
    config::AppConfig,
    export,
    history::{HistoryConfig, HistoryTracker},
    metrics::health::HealthMonitor,
    refresh::RefreshOrchestrator,
    simulation::Simulator,
    store::{LatencyState, LatencyStore, selectors},
    time::{Clock, SystemClock},
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Logs every committed snapshot together with health and cache figures.
fn spawn_reporter(
    mut rx: watch::Receiver<LatencyState>,
    orchestrator: Arc<RefreshOrchestrator>,
    health: Arc<HealthMonitor>,
    cache: Arc<ClientCache<CachedPayload>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen = None;

        while rx.changed().await.is_ok() {
            let (updated, line) = {
                let st = rx.borrow_and_update();
                if st.loading || st.last_updated == last_seen {
                    continue;
                }
                let tiers = selectors::by_tier(&st);
                (
                    st.last_updated,
                    (
                        selectors::exchange_count(&st),
                        selectors::average_latency(&st),
                        tiers.excellent.len(),
                        tiers.good.len(),
                        tiers.poor.len(),
                        st.api.connection_status,
                    ),
                )
            };
            last_seen = updated;

            let (count, avg, excellent, good, poor, status) = line;
            let report = health.health_report();
            let cache_stats = cache.stats();
            let history = orchestrator.history_stats();
            let tracked = orchestrator.tracked_exchange();

            info!(
                target: "report",
                exchanges = count,
                avg_latency_ms = %format!("{avg:.1}"),
                excellent,
                good,
                poor,
                connection = ?status,
                health = ?report.overall_health,
                success_rate = %format!("{:.1}", report.success_rate),
                cache_size = cache_stats.size,
                cache_hit_rate = %format!("{:.1}", cache_stats.hit_rate),
                tracked = tracked.as_deref().unwrap_or("-"),
                history_trend = ?history.trend,
                "snapshot"
            );

            for alert in health.alerts() {
                warn!(target: "report", %alert, "health alert");
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env();
    init_logger("latency", cfg.json_logs);

    info!("Starting latency topology driver...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let simulator = Arc::new(Simulator::new(Arc::clone(&clock)));
    let cache = Arc::new(ClientCache::new(Arc::clone(&clock)));
    let health = Arc::new(HealthMonitor::new(Arc::clone(&clock)));
    let limiter = Arc::new(RateLimiter::new(cfg.rate_limit, Arc::clone(&clock)));

    let client = UpstreamClient::new(cfg.api_base_url.clone(), cfg.api_token.clone())?;
    if !client.has_token() {
        warn!("LATENCY_API_TOKEN not set, snapshots will be simulated");
    }

    let gateway = Arc::new(ApiGateway::new(
        client,
        Arc::clone(&cache),
        limiter,
        Arc::clone(&health),
        Arc::clone(&simulator),
    ));

    let store = LatencyStore::with_settings(cfg.settings(), Arc::clone(&clock));
    let orchestrator = RefreshOrchestrator::new(
        store.clone(),
        gateway,
        simulator,
        Arc::clone(&cache),
        HistoryTracker::new(HistoryConfig::default(), Arc::clone(&clock)),
        Arc::clone(&clock),
    );
    orchestrator.set_use_real(cfg.use_real);

    let reporter = spawn_reporter(
        store.subscribe(),
        Arc::clone(&orchestrator),
        Arc::clone(&health),
        Arc::clone(&cache),
    );

    if let Err(e) = orchestrator.refresh(cfg.use_real).await {
        error!(error = %e, "initial refresh failed");
    }

    if let Some(name) = cfg.track_exchange.as_deref() {
        if let Err(e) = orchestrator.select_exchange(Some(name)) {
            warn!(error = %e, "cannot track configured exchange");
        }
    }

    orchestrator.start_auto_refresh();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    orchestrator.stop_auto_refresh();
    reporter.abort();

    if let Some(dir) = cfg.export_dir.as_deref() {
        let records = store.records();
        match export::write_exports(dir, &records, clock.now_utc()) {
            Ok(paths) => info!(?paths, "final snapshot exported"),
            Err(e) => error!(error = %e, "export failed"),
        }
    }

    Ok(())
}
