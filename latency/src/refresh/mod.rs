//! Refresh cycle, auto-refresh timer and user commands.
//!
//! A cycle goes: cache check → token verification → upstream fetch, and any
//! upstream failure falls through to the simulator before committing.
//!
//! Overlapping cycles are not serialized. Each commit replaces the snapshot
//! wholesale, so the last cycle to finish wins even if it started first; stale
//! results are not discarded by sequence number.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use common::logger::{TraceId, root_span};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, info, instrument, warn};

use crate::api::cache::ClientCache;
use crate::api::errors::ApiError;
use crate::api::gateway::{CachedPayload, LATENCY_DATA_KEY, LatencySource};
use crate::error::AppError;
use crate::exchange::types::{HistoryPoint, LatencyRecord, TimeRange};
use crate::history::{HistoryStats, HistoryTracker, MemoryUsage};
use crate::simulation::Simulator;
use crate::store::{ConnectionStatus, LatencyStore};
use crate::time::Clock;

/// Snapshots younger than this are served as-is when caching is on.
pub const FRESHNESS_WINDOW_MS: u64 = 30_000;

pub const HISTORICAL_DATA_KEY: &str = "historical-data";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Existing snapshot returned untouched.
    Cached,
    Upstream,
    Simulated,
}

#[derive(Clone, Debug)]
pub struct RefreshOutcome {
    pub records: Arc<Vec<LatencyRecord>>,
    pub origin: Origin,
}

pub struct RefreshOrchestrator {
    store: LatencyStore,
    source: Arc<dyn LatencySource>,
    simulator: Arc<Simulator>,
    cache: Arc<ClientCache<CachedPayload>>,
    clock: Arc<dyn Clock>,
    use_real: AtomicBool,
    auto_timer: Mutex<Option<JoinHandle<()>>>,
    history: Mutex<HistoryTracker>,
}

impl RefreshOrchestrator {
    pub fn new(
        store: LatencyStore,
        source: Arc<dyn LatencySource>,
        simulator: Arc<Simulator>,
        cache: Arc<ClientCache<CachedPayload>>,
        history: HistoryTracker,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        cache.set_enabled(store.read(|s| s.settings.cache_enabled));

        Arc::new(Self {
            store,
            source,
            simulator,
            cache,
            clock,
            use_real: AtomicBool::new(false),
            auto_timer: Mutex::new(None),
            history: Mutex::new(history),
        })
    }

    pub fn store(&self) -> &LatencyStore {
        &self.store
    }

    /// Whether timer-driven refreshes probe real endpoints.
    pub fn set_use_real(&self, use_real: bool) {
        self.use_real.store(use_real, Ordering::Relaxed);
    }

    /// Runs one refresh cycle. Only a generator failure yields `Err`, and it is
    /// also written to the store's `error` field.
    pub async fn refresh(&self, use_real: bool) -> Result<RefreshOutcome, AppError> {
        let trace_id = TraceId::new();
        let span = root_span("refresh", &trace_id);

        async move {
            if let Some(records) = self.fresh_snapshot() {
                debug!(target: "refresh", "snapshot still fresh, skipping fetch");
                return Ok(RefreshOutcome {
                    records,
                    origin: Origin::Cached,
                });
            }

            let in_flight = InFlight::begin(&self.store);
            let started = self.clock.now_ms();

            let outcome = match self.fetch_upstream(use_real).await {
                Ok(records) => {
                    self.store.set_connection_status(ConnectionStatus::Connected);
                    RefreshOutcome {
                        records,
                        origin: Origin::Upstream,
                    }
                }
                Err(e) => {
                    warn!(target: "refresh", error = %e, "upstream unavailable, falling back to simulation");
                    match self.simulator.generate() {
                        Ok(records) => {
                            self.store
                                .set_connection_status(ConnectionStatus::Disconnected);
                            RefreshOutcome {
                                records: Arc::new(records),
                                origin: Origin::Simulated,
                            }
                        }
                        Err(e) => {
                            in_flight.finish();
                            self.store.set_connection_status(ConnectionStatus::Error);
                            self.store.record_api_call(LATENCY_DATA_KEY, 0.0, false);
                            self.store.set_error(e.to_string());
                            return Err(e);
                        }
                    }
                }
            };

            in_flight.finish();
            let elapsed = self.clock.now_ms().saturating_sub(started);
            self.store
                .record_api_call(LATENCY_DATA_KEY, elapsed as f64, true);
            // Plain replacement: a slower, older cycle finishing later overwrites this.
            self.store.commit_records(Arc::clone(&outcome.records));

            info!(
                target: "refresh",
                origin = ?outcome.origin,
                count = outcome.records.len(),
                elapsed_ms = elapsed,
                "refresh committed"
            );
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    fn fresh_snapshot(&self) -> Option<Arc<Vec<LatencyRecord>>> {
        let now = self.clock.now_utc();
        self.store.read(|s| {
            let last = s.last_updated?;
            let age_ms = (now - last).num_milliseconds();
            let fresh = s.settings.cache_enabled
                && !s.records.is_empty()
                && (0..FRESHNESS_WINDOW_MS as i64).contains(&age_ms);
            fresh.then(|| Arc::clone(&s.records))
        })
    }

    async fn fetch_upstream(&self, use_real: bool) -> Result<Arc<Vec<LatencyRecord>>, ApiError> {
        let verified = self.source.verify_token().await;
        self.store.set_token_valid(verified.is_ok());
        verified?;

        self.source.fetch_latency(use_real).await
    }

    /// Commits a freshly simulated snapshot, bypassing cache and upstream.
    #[instrument(skip(self), target = "refresh")]
    pub fn generate_test_data(&self) -> Result<Arc<Vec<LatencyRecord>>, AppError> {
        match self.simulator.generate() {
            Ok(records) => {
                let records = Arc::new(records);
                self.store.commit_records(Arc::clone(&records));
                info!(count = records.len(), "test data generated");
                Ok(records)
            }
            Err(e) => {
                self.store.set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// (Re)starts the auto-refresh timer from current settings. A running timer
    /// is always aborted first; nothing is spawned while auto-refresh is off.
    pub fn start_auto_refresh(self: &Arc<Self>) {
        let mut slot = self.auto_timer.lock();
        if let Some(old) = slot.take() {
            old.abort();
        }

        let (enabled, period) = self
            .store
            .read(|s| (s.settings.auto_refresh, s.settings.refresh_interval));
        if !enabled {
            return;
        }

        let weak = Arc::downgrade(self);
        *slot = Some(tokio::spawn(auto_refresh_loop(weak, period)));
        debug!(target: "refresh", period_ms = period.as_millis() as u64, "auto refresh scheduled");
    }

    pub fn stop_auto_refresh(&self) {
        if let Some(handle) = self.auto_timer.lock().take() {
            handle.abort();
            debug!(target: "refresh", "auto refresh cancelled");
        }
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.auto_timer
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn toggle_auto_refresh(self: &Arc<Self>, enabled: bool) {
        self.store.set_auto_refresh(enabled);
        if enabled {
            self.start_auto_refresh();
        } else {
            self.stop_auto_refresh();
        }
    }

    pub fn set_refresh_interval(self: &Arc<Self>, interval: Duration) -> Result<(), AppError> {
        if interval.is_zero() {
            return Err(AppError::InvalidSetting(
                "refresh interval must be positive".into(),
            ));
        }

        self.store.set_refresh_interval(interval);
        if self.store.read(|s| s.settings.auto_refresh) {
            self.start_auto_refresh();
        }
        Ok(())
    }

    pub fn toggle_cache(&self, enabled: bool) {
        self.store.set_cache_enabled(enabled);
        self.cache.set_enabled(enabled);
    }

    /// Selects (or clears) the exchange whose history is charted and tracked live.
    #[instrument(skip(self), target = "refresh")]
    pub fn select_exchange(&self, exchange: Option<&str>) -> Result<(), AppError> {
        let Some(name) = exchange else {
            self.store.select_exchange(None);
            self.history.lock().stop();
            return Ok(());
        };

        let spec = self
            .simulator
            .find(name)
            .copied()
            .ok_or_else(|| AppError::InvalidSetting(format!("unknown exchange {name}")))?;

        self.store.select_exchange(Some(spec.name.to_string()));
        self.load_historical(spec.name, self.store.read(|s| s.settings.time_range));

        let initial = self.store.read(|s| {
            s.records
                .iter()
                .find(|r| r.exchange == spec.name)
                .map(|r| r.latency)
                .unwrap_or(spec.base_latency_ms)
        });
        self.history.lock().track(spec.name, initial);
        Ok(())
    }

    /// Changes the chart window and re-backfills the selected exchange.
    pub fn set_time_range(&self, range: TimeRange) {
        self.store.set_time_range(range);
        if let Some(name) = self.store.read(|s| s.settings.selected_exchange.clone()) {
            self.load_historical(&name, range);
        }
    }

    fn load_historical(&self, exchange: &str, range: TimeRange) {
        let started = self.clock.now_ms();
        let points = self.simulator.backfill(range);
        let elapsed = self.clock.now_ms().saturating_sub(started);

        debug!(target: "refresh", exchange, %range, points = points.len(), "historical data loaded");
        self.store.set_historical(exchange, points);
        self.store
            .record_api_call(HISTORICAL_DATA_KEY, elapsed as f64, true);
    }

    pub fn tracked_exchange(&self) -> Option<String> {
        self.history.lock().exchange()
    }

    pub fn history_snapshot(&self) -> Vec<HistoryPoint> {
        self.history.lock().snapshot()
    }

    pub fn history_stats(&self) -> HistoryStats {
        self.history.lock().stats()
    }

    pub fn history_memory_usage(&self) -> Option<MemoryUsage> {
        self.history.lock().memory_usage()
    }

    pub fn history_manual_cleanup(&self) -> usize {
        self.history.lock().manual_cleanup()
    }
}

impl Drop for RefreshOrchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self.auto_timer.get_mut().take() {
            handle.abort();
        }
    }
}

/// Marks a cycle as loading. If the cycle is dropped before `finish` (its task
/// aborted mid-fetch), `loading` is cleared and the connection status restored.
struct InFlight<'a> {
    store: &'a LatencyStore,
    previous: ConnectionStatus,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn begin(store: &'a LatencyStore) -> Self {
        let previous = store.read(|s| s.api.connection_status);
        store.set_loading(true);
        store.set_connection_status(ConnectionStatus::Connecting);
        Self {
            store,
            previous,
            armed: true,
        }
    }

    fn finish(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.set_loading(false);
            self.store.set_connection_status(self.previous);
            debug!(target: "refresh", "refresh cancelled before commit");
        }
    }
}

async fn auto_refresh_loop(weak: Weak<RefreshOrchestrator>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(this) = weak.upgrade() else {
            break;
        };

        let use_real = this.use_real.load(Ordering::Relaxed);
        if let Err(e) = this.refresh(use_real).await {
            warn!(target: "refresh", error = %e, "scheduled refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tracing_test::traced_test;

    use super::*;
    use crate::api::client::TokenStatus;
    use crate::exchange::EXCHANGES;
    use crate::history::HistoryConfig;
    use crate::simulation::generator::FixedNoise;
    use crate::time::ManualClock;

    struct StubSource {
        token_ok: bool,
        verify_delay: Duration,
        records: Arc<Vec<LatencyRecord>>,
    }

    #[async_trait]
    impl LatencySource for StubSource {
        async fn verify_token(&self) -> Result<TokenStatus, ApiError> {
            if !self.verify_delay.is_zero() {
                tokio::time::sleep(self.verify_delay).await;
            }
            if self.token_ok {
                Ok(TokenStatus {
                    id: "t".into(),
                    status: "active".into(),
                })
            } else {
                Err(ApiError::MissingToken)
            }
        }

        async fn fetch_latency(&self, _use_real: bool) -> Result<Arc<Vec<LatencyRecord>>, ApiError> {
            Ok(Arc::clone(&self.records))
        }
    }

    fn upstream_records() -> Arc<Vec<LatencyRecord>> {
        let now = chrono::Utc::now();
        Arc::new(
            EXCHANGES
                .iter()
                .map(|e| LatencyRecord::from_spec(e, 7, now))
                .collect(),
        )
    }

    fn orchestrator(
        token_ok: bool,
        table: Vec<crate::exchange::ExchangeSpec>,
    ) -> (Arc<ManualClock>, Arc<RefreshOrchestrator>) {
        orchestrator_with(
            StubSource {
                token_ok,
                verify_delay: Duration::ZERO,
                records: upstream_records(),
            },
            table,
        )
    }

    fn orchestrator_with(
        source: StubSource,
        table: Vec<crate::exchange::ExchangeSpec>,
    ) -> (Arc<ManualClock>, Arc<RefreshOrchestrator>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let sim = Arc::new(Simulator::with_noise(
            table,
            Box::new(FixedNoise::neutral()),
            dyn_clock.clone(),
        ));
        let orch = RefreshOrchestrator::new(
            LatencyStore::new(dyn_clock.clone()),
            Arc::new(source),
            sim,
            Arc::new(ClientCache::new(dyn_clock.clone())),
            HistoryTracker::new(HistoryConfig::default(), dyn_clock.clone()),
            dyn_clock,
        );
        (clock, orch)
    }

    #[tokio::test]
    async fn verified_token_commits_upstream_data() {
        let (_, orch) = orchestrator(true, EXCHANGES.to_vec());

        let out = orch.refresh(false).await.unwrap();
        assert_eq!(out.origin, Origin::Upstream);
        assert!(out.records.iter().all(|r| r.latency == 7));

        let st = orch.store().snapshot();
        assert!(Arc::ptr_eq(&st.records, &out.records));
        assert_eq!(st.api.connection_status, ConnectionStatus::Connected);
        assert!(st.api.api_token_valid);
        assert_eq!(st.api.endpoints[LATENCY_DATA_KEY].success_count, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn rejected_token_falls_back_to_simulation() {
        let (_, orch) = orchestrator(false, EXCHANGES.to_vec());

        let out = orch.refresh(false).await.unwrap();
        assert_eq!(out.origin, Origin::Simulated);
        assert_eq!(out.records.len(), EXCHANGES.len());
        assert!(logs_contain("falling back to simulation"));

        let st = orch.store().snapshot();
        assert!(!st.api.api_token_valid);
        assert!(st.error.is_none());
        assert!(!st.loading);
    }

    #[tokio::test]
    async fn fresh_snapshot_short_circuits() {
        let (clock, orch) = orchestrator(false, EXCHANGES.to_vec());

        let first = orch.refresh(false).await.unwrap();
        clock.advance(29_999);
        let second = orch.refresh(false).await.unwrap();

        assert_eq!(second.origin, Origin::Cached);
        assert!(Arc::ptr_eq(&first.records, &second.records));

        clock.advance(1);
        let third = orch.refresh(false).await.unwrap();
        assert_eq!(third.origin, Origin::Simulated);
    }

    #[tokio::test]
    async fn disabled_cache_always_fetches() {
        let (_, orch) = orchestrator(false, EXCHANGES.to_vec());
        orch.toggle_cache(false);

        orch.refresh(false).await.unwrap();
        let again = orch.refresh(false).await.unwrap();
        assert_eq!(again.origin, Origin::Simulated);
    }

    #[tokio::test]
    async fn generation_failure_lands_in_store_error() {
        let (_, orch) = orchestrator(false, vec![]);

        assert!(orch.refresh(false).await.is_err());

        let st = orch.store().snapshot();
        assert!(st.error.unwrap().contains("generation failed"));
        assert_eq!(st.api.connection_status, ConnectionStatus::Error);
        assert!(!st.loading);
    }

    #[tokio::test]
    async fn selecting_exchange_backfills_and_tracks() {
        let (_, orch) = orchestrator(false, EXCHANGES.to_vec());

        orch.select_exchange(Some("OKX")).unwrap();
        let st = orch.store().snapshot();
        assert_eq!(st.settings.selected_exchange.as_deref(), Some("OKX"));
        assert_eq!(st.historical["OKX"].len(), 1440);
        assert_eq!(orch.tracked_exchange().as_deref(), Some("OKX"));

        orch.set_time_range(TimeRange::OneHour);
        assert_eq!(orch.store().read(|s| s.historical["OKX"].len()), 60);

        orch.select_exchange(None).unwrap();
        assert!(orch.tracked_exchange().is_none());
        assert!(orch.select_exchange(Some("Atlantis")).is_err());
    }

    #[tokio::test]
    async fn test_data_bypasses_fresh_snapshot() {
        let (_, orch) = orchestrator(true, EXCHANGES.to_vec());

        let upstream = orch.refresh(false).await.unwrap();
        let generated = orch.generate_test_data().unwrap();

        assert!(!Arc::ptr_eq(&upstream.records, &generated));
        assert!(Arc::ptr_eq(&orch.store().records(), &generated));
        assert_eq!(orch.history_manual_cleanup(), 0);
        assert!(orch.history_memory_usage().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_auto_refresh_mid_fetch_clears_loading() {
        let (_, orch) = orchestrator_with(
            StubSource {
                token_ok: true,
                verify_delay: Duration::from_secs(3),
                records: upstream_records(),
            },
            EXCHANGES.to_vec(),
        );
        orch.set_refresh_interval(Duration::from_secs(5)).unwrap();

        // First tick at 5s; verification is still pending at 6s.
        tokio::time::sleep(Duration::from_secs(6)).await;
        let st = orch.store().snapshot();
        assert!(st.loading);
        assert_eq!(st.api.connection_status, ConnectionStatus::Connecting);

        orch.toggle_auto_refresh(false);
        tokio::time::sleep(Duration::from_secs(60)).await;

        let st = orch.store().snapshot();
        assert!(!st.loading);
        assert_eq!(st.api.connection_status, ConnectionStatus::Disconnected);
        assert!(st.records.is_empty());
        assert!(!orch.is_auto_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_manual_refresh_restores_previous_status() {
        let (_, orch) = orchestrator_with(
            StubSource {
                token_ok: true,
                verify_delay: Duration::from_secs(3),
                records: upstream_records(),
            },
            EXCHANGES.to_vec(),
        );
        orch.toggle_cache(false);
        orch.refresh(false).await.unwrap();
        assert_eq!(
            orch.store().read(|s| s.api.connection_status),
            ConnectionStatus::Connected
        );

        let timed_out =
            tokio::time::timeout(Duration::from_secs(1), orch.refresh(false)).await;
        assert!(timed_out.is_err());

        let st = orch.store().snapshot();
        assert!(!st.loading);
        assert_eq!(st.api.connection_status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let (_, orch) = orchestrator(false, EXCHANGES.to_vec());
        assert!(orch.set_refresh_interval(Duration::ZERO).is_err());
        assert!(orch.set_refresh_interval(Duration::from_secs(5)).is_ok());
        assert_eq!(
            orch.store().settings().refresh_interval,
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn toggling_auto_refresh_owns_one_timer() {
        let (_, orch) = orchestrator(false, EXCHANGES.to_vec());

        orch.toggle_auto_refresh(true);
        orch.toggle_auto_refresh(true);
        assert!(orch.is_auto_refreshing());

        orch.toggle_auto_refresh(false);
        assert!(!orch.is_auto_refreshing());
    }
}
