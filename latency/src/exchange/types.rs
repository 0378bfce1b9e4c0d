use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CloudProvider, ExchangeSpec, Location};

/// Upper bound (exclusive) of the "excellent" tier, in ms.
pub const EXCELLENT_BELOW_MS: u32 = 20;
/// Upper bound (exclusive) of the "good" tier, in ms.
pub const GOOD_BELOW_MS: u32 = 50;
/// Latency considered unacceptable by the dashboard legend, in ms.
pub const POOR_CEILING_MS: u32 = 100;

/// One exchange's current latency measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub exchange: String,
    pub location: Location,
    pub cloud: CloudProvider,
    pub region: String,
    /// Round trip in ms; always >= 1.
    pub latency: u32,
    pub timestamp: DateTime<Utc>,
}

impl LatencyRecord {
    pub fn from_spec(spec: &ExchangeSpec, latency: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            exchange: spec.name.to_string(),
            location: spec.location,
            cloud: spec.cloud,
            region: spec.region.to_string(),
            latency: latency.max(1),
            timestamp,
        }
    }

    pub fn tier(&self) -> LatencyTier {
        LatencyTier::classify(self.latency)
    }
}

/// One point of a latency chart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// Local `HH:MM` label.
    pub time: String,
    pub latency: u32,
    /// Epoch ms the point was produced; drives age pruning.
    pub ts_ms: u64,
}

impl HistoryPoint {
    pub fn new(ts_ms: u64, latency: u32) -> Self {
        Self {
            time: crate::time::display_time(ts_ms),
            latency: latency.max(1),
            ts_ms,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyTier {
    Excellent,
    Good,
    Poor,
}

impl LatencyTier {
    pub fn classify(latency_ms: u32) -> Self {
        if latency_ms < EXCELLENT_BELOW_MS {
            Self::Excellent
        } else if latency_ms < GOOD_BELOW_MS {
            Self::Good
        } else {
            Self::Poor
        }
    }
}

/// User-selected window for historical charts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    OneHour,
    #[default]
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl TimeRange {
    pub const ALL: [TimeRange; 4] = [
        TimeRange::OneHour,
        TimeRange::OneDay,
        TimeRange::SevenDays,
        TimeRange::ThirtyDays,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }

    /// Number of backfilled points for this range.
    pub fn backfill_points(&self) -> usize {
        match self {
            Self::OneHour => 60,
            Self::OneDay => 1_440,
            Self::SevenDays => 10_080,
            Self::ThirtyDays => 43_200,
        }
    }

    /// Spacing between backfilled points.
    pub fn backfill_step_ms(&self) -> u64 {
        match self {
            Self::OneHour | Self::OneDay => 60_000,
            Self::SevenDays => 600_000,
            Self::ThirtyDays => 3_600_000,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown time range: {s}"))
    }
}
