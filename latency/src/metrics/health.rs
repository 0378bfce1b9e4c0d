//! Per-endpoint health accounting.
//!
//! The response-time figure is smoothed as `(previous + latest) / 2` on every
//! call after the first, which seeds it. That is not an arithmetic mean over
//! all calls; consumers comparing it with `EndpointStats::average_response_time_ms`
//! in the store will see the two diverge.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::time::Clock;

/// Success rate (percent) below which the report downgrades to "good".
pub const GOOD_BELOW_PCT: f64 = 95.0;
pub const POOR_BELOW_PCT: f64 = 90.0;
pub const CRITICAL_BELOW_PCT: f64 = 80.0;

const ALERT_SUCCESS_RATE_PCT: f64 = 90.0;
const ALERT_RESPONSE_TIME_MS: f64 = 5_000.0;
const ALERT_ERROR_RATE_PCT: f64 = 20.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Excellent,
    Good,
    Poor,
    Critical,
}

impl OverallHealth {
    /// Cascading downgrade: each threshold can lower the label further.
    pub fn from_success_rate(success_rate: f64) -> Self {
        let mut health = Self::Excellent;
        if success_rate < GOOD_BELOW_PCT {
            health = Self::Good;
        }
        if success_rate < POOR_BELOW_PCT {
            health = Self::Poor;
        }
        if success_rate < CRITICAL_BELOW_PCT {
            health = Self::Critical;
        }
        health
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EndpointHealth {
    pub endpoint: String,
    pub uptime: f64,
    pub response_time_ms: f64,
    pub error_rate: f64,
    pub success_count: u64,
    pub error_count: u64,
    pub last_check_ms: u64,
    pub last_success_ms: Option<u64>,
    pub last_error_ms: Option<u64>,
}

impl EndpointHealth {
    fn new(endpoint: &str, now_ms: u64) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            uptime: 0.0,
            response_time_ms: 0.0,
            error_rate: 0.0,
            success_count: 0,
            error_count: 0,
            last_check_ms: now_ms,
            last_success_ms: None,
            last_error_ms: None,
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.success_count + self.error_count
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub overall_health: OverallHealth,
    pub average_response_time: f64,
    pub total_requests: u64,
    pub success_rate: f64,
    pub endpoints: Vec<EndpointHealth>,
    pub last_updated_ms: u64,
}

pub struct HealthMonitor {
    clock: Arc<dyn Clock>,
    started_at_ms: Mutex<u64>,
    endpoints: Mutex<BTreeMap<String, EndpointHealth>>,
}

impl HealthMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let started = clock.now_ms();
        Self {
            clock,
            started_at_ms: Mutex::new(started),
            endpoints: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn record_request(&self, endpoint: &str, response_time_ms: f64, success: bool) {
        let now = self.clock.now_ms();
        let started = *self.started_at_ms.lock();

        let mut endpoints = self.endpoints.lock();
        let e = endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointHealth::new(endpoint, now));

        e.last_check_ms = now;
        e.response_time_ms = if e.total_requests() == 0 {
            response_time_ms
        } else {
            (e.response_time_ms + response_time_ms) / 2.0
        };

        if success {
            e.success_count += 1;
            e.last_success_ms = Some(now);
        } else {
            e.error_count += 1;
            e.last_error_ms = Some(now);
        }

        let total = e.total_requests();
        e.error_rate = if total > 0 {
            e.error_count as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let elapsed = now.saturating_sub(started) as f64;
        let since_last_error = e
            .last_error_ms
            .map(|t| now.saturating_sub(t) as f64)
            .unwrap_or(0.0);
        e.uptime = if elapsed > 0.0 {
            (elapsed - since_last_error) / elapsed * 100.0
        } else {
            100.0
        };

        debug!(
            target: "health",
            endpoint,
            response_time_ms,
            success,
            smoothed_ms = e.response_time_ms,
            "request recorded"
        );
    }

    pub fn health_report(&self) -> HealthReport {
        let endpoints: Vec<EndpointHealth> = self.endpoints.lock().values().cloned().collect();

        let total_requests: u64 = endpoints.iter().map(|e| e.total_requests()).sum();
        let total_errors: u64 = endpoints.iter().map(|e| e.error_count).sum();
        let average_response_time = if endpoints.is_empty() {
            0.0
        } else {
            endpoints.iter().map(|e| e.response_time_ms).sum::<f64>() / endpoints.len() as f64
        };
        let success_rate = if total_requests > 0 {
            (total_requests - total_errors) as f64 / total_requests as f64 * 100.0
        } else {
            100.0
        };

        HealthReport {
            overall_health: OverallHealth::from_success_rate(success_rate),
            average_response_time,
            total_requests,
            success_rate,
            endpoints,
            last_updated_ms: self.clock.now_ms(),
        }
    }

    pub fn endpoint_health(&self, endpoint: &str) -> Option<EndpointHealth> {
        self.endpoints.lock().get(endpoint).cloned()
    }

    pub fn reset(&self) {
        self.endpoints.lock().clear();
        *self.started_at_ms.lock() = self.clock.now_ms();
    }

    pub fn alerts(&self) -> Vec<String> {
        let report = self.health_report();
        let mut alerts = Vec::new();

        if report.success_rate < ALERT_SUCCESS_RATE_PCT {
            alerts.push(format!("Low success rate: {:.1}%", report.success_rate));
        }
        if report.average_response_time > ALERT_RESPONSE_TIME_MS {
            alerts.push(format!(
                "Slow response time: {:.0}ms",
                report.average_response_time
            ));
        }
        for e in &report.endpoints {
            if e.error_rate > ALERT_ERROR_RATE_PCT {
                alerts.push(format!(
                    "High error rate for {}: {:.1}%",
                    e.endpoint, e.error_rate
                ));
            }
        }
        alerts
    }

    /// Times `fut` and records it under `endpoint`; `Ok` counts as success.
    pub async fn with_health_monitoring<F, T, E>(&self, endpoint: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let start = self.clock.now_ms();
        let out = fut.await;
        let elapsed = self.clock.now_ms().saturating_sub(start);

        self.record_request(endpoint, elapsed as f64, out.is_ok());
        out
    }
}
