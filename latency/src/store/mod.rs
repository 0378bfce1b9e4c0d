//! Observable application state.
//!
//! Backed by a `tokio::sync::watch` channel: every command replaces or patches
//! the state under the channel's lock and wakes subscribers. Commits are plain
//! assignments, so concurrent refreshes resolve as last write wins.

pub mod selectors;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::exchange::types::{HistoryPoint, LatencyRecord, TimeRange};
use crate::time::Clock;
pub use state::{
    ApiStatus, AppSettings, ConnectionStatus, EndpointStats, LatencyState,
    REFRESH_INTERVAL_PRESETS_MS,
};

#[derive(Clone)]
pub struct LatencyStore {
    tx: Arc<watch::Sender<LatencyState>>,
    clock: Arc<dyn Clock>,
}

impl LatencyStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_settings(AppSettings::default(), clock)
    }

    pub fn with_settings(settings: AppSettings, clock: Arc<dyn Clock>) -> Self {
        let (tx, _rx) = watch::channel(LatencyState {
            settings,
            ..Default::default()
        });
        Self {
            tx: Arc::new(tx),
            clock,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LatencyState> {
        self.tx.subscribe()
    }

    /// Runs `f` against the current state without cloning it.
    pub fn read<T>(&self, f: impl FnOnce(&LatencyState) -> T) -> T {
        f(&self.tx.borrow())
    }

    pub fn snapshot(&self) -> LatencyState {
        self.tx.borrow().clone()
    }

    pub fn records(&self) -> Arc<Vec<LatencyRecord>> {
        self.read(|s| s.records.clone())
    }

    pub fn settings(&self) -> AppSettings {
        self.read(|s| s.settings.clone())
    }

    pub fn set_loading(&self, loading: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.loading != loading;
            s.loading = loading;
            changed
        });
    }

    /// Replaces the snapshot, stamps `last_updated`, clears `error` and `loading`.
    pub fn commit_records(&self, records: Arc<Vec<LatencyRecord>>) {
        let now = self.clock.now_utc();
        let count = records.len();
        self.tx.send_modify(|s| {
            s.records = records;
            s.last_updated = Some(now);
            s.error = None;
            s.loading = false;
        });
        debug!(target: "store", count, "latency snapshot committed");
    }

    /// Patches a single exchange's latency. Returns false when it is unknown.
    pub fn update_exchange_latency(&self, exchange: &str, latency: u32) -> bool {
        let now = self.clock.now_utc();
        self.tx.send_if_modified(|s| {
            let Some(idx) = s.records.iter().position(|r| r.exchange == exchange) else {
                return false;
            };
            let records = Arc::make_mut(&mut s.records);
            records[idx].latency = latency.max(1);
            records[idx].timestamp = now;
            true
        })
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.tx.send_modify(|s| {
            s.error = Some(error);
            s.loading = false;
        });
    }

    pub fn clear_error(&self) {
        self.tx.send_if_modified(|s| s.error.take().is_some());
    }

    pub fn set_historical(&self, exchange: &str, points: Vec<HistoryPoint>) {
        self.tx.send_modify(|s| {
            s.historical.insert(exchange.to_string(), points);
        });
    }

    pub fn set_time_range(&self, range: TimeRange) {
        self.tx.send_modify(|s| s.settings.time_range = range);
        info!(target: "store", %range, "time range changed");
    }

    pub fn set_refresh_interval(&self, interval: Duration) {
        self.tx.send_modify(|s| s.settings.refresh_interval = interval);
        info!(target: "store", interval_ms = interval.as_millis() as u64, "refresh interval changed");
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.tx.send_modify(|s| s.settings.cache_enabled = enabled);
        info!(target: "store", enabled, "cache toggled");
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        self.tx.send_modify(|s| s.settings.auto_refresh = enabled);
        info!(target: "store", enabled, "auto refresh toggled");
    }

    pub fn select_exchange(&self, exchange: Option<String>) {
        self.tx.send_modify(|s| s.settings.selected_exchange = exchange);
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.tx.send_if_modified(|s| {
            let changed = s.api.connection_status != status;
            s.api.connection_status = status;
            changed
        });
    }

    pub fn set_token_valid(&self, valid: bool) {
        let now = self.clock.now_utc();
        self.tx.send_modify(|s| {
            s.api.api_token_valid = valid;
            s.api.last_token_check = Some(now);
        });
    }

    /// Counts one upstream call and folds it into the endpoint's running mean.
    pub fn record_api_call(&self, endpoint: &str, response_time_ms: f64, success: bool) {
        let now = self.clock.now_utc();
        self.tx.send_modify(|s| {
            s.api.api_calls_count += 1;
            s.api.last_api_call = Some(now);
            s.api
                .endpoints
                .entry(endpoint.to_string())
                .or_default()
                .record(now, response_time_ms, success);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::EXCHANGES;
    use crate::time::ManualClock;

    fn store() -> (Arc<ManualClock>, LatencyStore) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        (clock.clone(), LatencyStore::new(clock))
    }

    fn records(latency: u32) -> Arc<Vec<LatencyRecord>> {
        let now = chrono::Utc::now();
        Arc::new(
            EXCHANGES
                .iter()
                .map(|e| LatencyRecord::from_spec(e, latency, now))
                .collect(),
        )
    }

    #[test]
    fn commit_stamps_and_clears_error() {
        let (clock, store) = store();
        store.set_loading(true);
        store.set_error("boom");

        store.commit_records(records(10));

        let st = store.snapshot();
        assert_eq!(st.records.len(), EXCHANGES.len());
        assert_eq!(st.last_updated, Some(clock.now_utc()));
        assert!(st.error.is_none());
        assert!(!st.loading);
    }

    #[test]
    fn update_patches_one_record() {
        let (clock, store) = store();
        let before = records(10);
        store.commit_records(before.clone());
        clock.advance(500);

        assert!(store.update_exchange_latency("Kraken", 0));
        assert!(!store.update_exchange_latency("Nowhere", 5));

        let after = store.records();
        let kraken = after.iter().find(|r| r.exchange == "Kraken").unwrap();
        assert_eq!(kraken.latency, 1);
        assert_eq!(kraken.timestamp, clock.now_utc());
        // The committed Arc is not mutated behind earlier readers.
        assert!(before.iter().all(|r| r.latency == 10));
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let (_, store) = store();
        let mut rx = store.subscribe();

        store.set_auto_refresh(false);
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().settings.auto_refresh);

        store.clear_error();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn api_calls_are_counted_per_endpoint() {
        let (_, store) = store();
        store.record_api_call("latency-data", 10.0, true);
        store.record_api_call("latency-data", 30.0, false);
        store.record_api_call("historical-data", 5.0, true);

        let api = store.read(|s| s.api.clone());
        assert_eq!(api.api_calls_count, 3);
        let ld = &api.endpoints["latency-data"];
        assert_eq!((ld.success_count, ld.error_count), (1, 1));
        assert_eq!(ld.average_response_time_ms, 20.0);
    }
}
