use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::rate_limiter::RateLimitConfig;
use crate::exchange::types::TimeRange;
use crate::store::AppSettings;

pub const DEFAULT_API_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

#[derive(Clone, Debug)]
pub struct AppConfig {
    // =========================
    // Upstream
    // =========================
    /// Base URL of the token-verification API.
    pub api_base_url: String,

    /// Bearer token for the verification endpoint.
    ///
    /// When absent, verification fails immediately and every refresh
    /// resolves to simulated data.
    pub api_token: Option<String>,

    /// Probe real exchange endpoints on timer-driven refreshes.
    ///
    /// Probes are best effort: each exchange falls back to its simulated
    /// value on failure or after 5s.
    pub use_real: bool,

    /// Fixed-window budget shared by every logical upstream operation key.
    pub rate_limit: RateLimitConfig,

    // =========================
    // Initial settings
    // =========================
    pub refresh_interval: Duration,
    pub auto_refresh: bool,
    pub cache_enabled: bool,
    pub time_range: TimeRange,

    /// Exchange whose history is tracked from startup.
    pub track_exchange: Option<String>,

    // =========================
    // Driver
    // =========================
    /// Where the final snapshot is written on shutdown. Nothing is written when unset.
    pub export_dir: Option<PathBuf>,

    /// JSON logs instead of pretty output.
    pub json_logs: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unparseable values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let parsed = |key: &str| get(key).and_then(|v| v.parse::<u64>().ok());
        let flag = |key: &str, default: bool| get(key).and_then(|v| parse_bool(&v)).unwrap_or(default);

        let defaults = AppSettings::default();
        let rate_defaults = RateLimitConfig::default();

        Self {
            api_base_url: get("LATENCY_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            api_token: get("LATENCY_API_TOKEN"),
            use_real: flag("LATENCY_USE_REAL", false),
            rate_limit: RateLimitConfig {
                max_requests: parsed("LATENCY_RATE_LIMIT_MAX")
                    .filter(|n| *n > 0)
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(rate_defaults.max_requests),
                window: parsed("LATENCY_RATE_LIMIT_WINDOW_MS")
                    .filter(|n| *n > 0)
                    .map(Duration::from_millis)
                    .unwrap_or(rate_defaults.window),
            },

            refresh_interval: parsed("LATENCY_REFRESH_INTERVAL_MS")
                .filter(|n| *n > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.refresh_interval),
            auto_refresh: flag("LATENCY_AUTO_REFRESH", defaults.auto_refresh),
            cache_enabled: flag("LATENCY_CACHE_ENABLED", defaults.cache_enabled),
            time_range: get("LATENCY_TIME_RANGE")
                .and_then(|v| TimeRange::from_str(&v).ok())
                .unwrap_or(defaults.time_range),
            track_exchange: get("LATENCY_TRACK_EXCHANGE"),

            export_dir: get("LATENCY_EXPORT_DIR").map(PathBuf::from),
            json_logs: get("APP_ENV").is_some_and(|v| v == "production"),
        }
    }

    /// Initial store settings. The tracked exchange is applied later, through
    /// the orchestrator, so its history gets backfilled.
    pub fn settings(&self) -> AppSettings {
        AppSettings {
            time_range: self.time_range,
            refresh_interval: self.refresh_interval,
            cache_enabled: self.cache_enabled,
            auto_refresh: self.auto_refresh,
            selected_exchange: None,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
