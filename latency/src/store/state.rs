use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::exchange::types::{HistoryPoint, LatencyRecord, TimeRange};

/// Refresh periods offered to users.
pub const REFRESH_INTERVAL_PRESETS_MS: [u64; 4] = [5_000, 10_000, 30_000, 60_000];

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(10_000);

/// User-controlled knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppSettings {
    pub time_range: TimeRange,
    pub refresh_interval: Duration,
    pub cache_enabled: bool,
    pub auto_refresh: bool,
    pub selected_exchange: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            time_range: TimeRange::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            cache_enabled: true,
            auto_refresh: true,
            selected_exchange: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
    Connecting,
    Error,
}

/// Per-endpoint call accounting kept in the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EndpointStats {
    pub last_call: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub error_count: u64,
    /// Arithmetic mean over every recorded call.
    pub average_response_time_ms: f64,
}

impl EndpointStats {
    pub fn record(&mut self, at: DateTime<Utc>, response_time_ms: f64, success: bool) {
        self.last_call = Some(at);
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }

        let n = (self.success_count + self.error_count) as f64;
        self.average_response_time_ms =
            (self.average_response_time_ms * (n - 1.0) + response_time_ms) / n;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ApiStatus {
    pub connection_status: ConnectionStatus,
    pub last_api_call: Option<DateTime<Utc>>,
    pub api_calls_count: u64,
    pub api_token_valid: bool,
    pub last_token_check: Option<DateTime<Utc>>,
    pub endpoints: BTreeMap<String, EndpointStats>,
}

/// Everything observers can read.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LatencyState {
    /// Replaced wholesale on every commit; never patched in place by a refresh.
    pub records: Arc<Vec<LatencyRecord>>,
    pub historical: HashMap<String, Vec<HistoryPoint>>,
    pub loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub settings: AppSettings,
    pub api: ApiStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_stats_keep_true_mean() {
        let mut s = EndpointStats::default();
        let now = Utc::now();
        s.record(now, 100.0, true);
        s.record(now, 300.0, true);
        s.record(now, 400.0, false);

        assert_eq!(s.success_count, 2);
        assert_eq!(s.error_count, 1);
        assert!((s.average_response_time_ms - 800.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.last_call, Some(now));
    }

    #[test]
    fn defaults_match_first_launch() {
        let st = LatencyState::default();
        assert!(st.records.is_empty());
        assert!(st.last_updated.is_none());
        assert_eq!(st.settings.time_range, TimeRange::OneDay);
        assert_eq!(st.settings.refresh_interval, Duration::from_millis(10_000));
        assert!(st.settings.cache_enabled && st.settings.auto_refresh);
        assert_eq!(st.api.connection_status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn state_serializes_shared_records() {
        let st = LatencyState {
            records: Arc::new(Vec::new()),
            loading: true,
            ..LatencyState::default()
        };
        let v = serde_json::to_value(&st).unwrap();
        assert!(v["records"].as_array().is_some_and(|r| r.is_empty()));
        assert_eq!(v["loading"], true);
        assert_eq!(v["api"]["connection_status"], "disconnected");
    }
}
