use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::exchange::types::HistoryPoint;

/// Points backfilled when an exchange starts being tracked.
pub const SEED_POINTS: usize = 30;
/// Spacing between seeded points.
pub const SEED_SPACING_MS: u64 = 60_000;
/// Points older than this are dropped by the cleanup tick.
pub const MAX_POINT_AGE_MS: u64 = 3_600_000;
/// Window size for the trend comparison.
const TREND_WINDOW: usize = 5;
/// Mean difference (ms) required to call a trend.
const TREND_THRESHOLD_MS: f64 = 5.0;

#[derive(Clone, Copy, Debug)]
pub struct HistoryConfig {
    /// Hard cap on buffered points; oldest are dropped first.
    pub max_data_points: usize,
    /// Period of the live append timer.
    pub update_interval: Duration,
    /// Period of the age/count cleanup timer.
    pub cleanup_interval: Duration,
    /// Above this many points the buffer is halved.
    pub memory_threshold: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_data_points: 100,
            update_interval: Duration::from_millis(5_000),
            cleanup_interval: Duration::from_millis(30_000),
            memory_threshold: 1_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub min: u32,
    pub max: u32,
    pub average: u32,
    pub trend: Trend,
}

impl Default for HistoryStats {
    fn default() -> Self {
        Self {
            min: 0,
            max: 0,
            average: 0,
            trend: Trend::Stable,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub data_points: usize,
    pub max_allowed: usize,
    pub memory_threshold: usize,
    pub last_update_ms: u64,
}

/// Rolling (time, latency) series for one exchange.
///
/// Guarantees:
/// - never holds more than `max_data_points` after an append or a cleanup
/// - after `cleanup(now)`, no point is older than `MAX_POINT_AGE_MS`
/// - appended values follow a bounded random walk from the previous point
pub struct HistoryBuffer {
    exchange: String,
    initial_latency: u32,
    config: HistoryConfig,
    points: VecDeque<HistoryPoint>,
    last_update_ms: u64,
}

impl HistoryBuffer {
    /// Empty buffer; `seeded` is the usual entry point.
    pub fn new(exchange: impl Into<String>, initial_latency: u32, config: HistoryConfig) -> Self {
        Self {
            exchange: exchange.into(),
            initial_latency: initial_latency.max(1),
            config,
            points: VecDeque::with_capacity(config.max_data_points.min(1_024)),
            last_update_ms: 0,
        }
    }

    /// Backfills up to `SEED_POINTS` points one minute apart ending at `now_ms`,
    /// each within ±5 ms of `initial_latency`.
    pub fn seeded<R: Rng + ?Sized>(
        exchange: impl Into<String>,
        initial_latency: u32,
        config: HistoryConfig,
        now_ms: u64,
        rng: &mut R,
    ) -> Self {
        let mut buf = Self::new(exchange, initial_latency, config);
        let n = SEED_POINTS.min(config.max_data_points);

        for i in 0..n {
            let ts = now_ms.saturating_sub((n - 1 - i) as u64 * SEED_SPACING_MS);
            let latency = offset(buf.initial_latency, rng.gen_range(-5..=5));
            buf.points.push_back(HistoryPoint::new(ts, latency));
        }
        buf.last_update_ms = now_ms;
        buf
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    pub fn points(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<HistoryPoint> {
        self.points.iter().cloned().collect()
    }

    /// Live tick: next value is the last one moved by U{-4..=4}, floored at 1.
    pub fn push_next<R: Rng + ?Sized>(&mut self, now_ms: u64, rng: &mut R) -> u32 {
        let last = self
            .points
            .back()
            .map(|p| p.latency)
            .unwrap_or(self.initial_latency);
        let latency = offset(last, rng.gen_range(-4..=4));

        self.push(HistoryPoint::new(now_ms, latency));
        latency
    }

    /// Appends a point, evicting the oldest beyond capacity, then halves the
    /// buffer if it is still above the memory threshold.
    pub fn push(&mut self, point: HistoryPoint) {
        self.last_update_ms = point.ts_ms;
        self.points.push_back(point);

        while self.points.len() > self.config.max_data_points {
            self.points.pop_front();
        }

        self.aggressive_cleanup();
    }

    /// Drops points older than one hour and re-enforces the count cap.
    /// Returns how many points were removed.
    pub fn cleanup(&mut self, now_ms: u64) -> usize {
        let before = self.points.len();
        let cutoff = now_ms.saturating_sub(MAX_POINT_AGE_MS);

        self.points.retain(|p| p.ts_ms > cutoff);

        let excess = self.points.len().saturating_sub(self.config.max_data_points);
        self.points.drain(..excess);

        before - self.points.len()
    }

    /// Keeps only the most recent half when above `memory_threshold`.
    pub fn aggressive_cleanup(&mut self) -> bool {
        let len = self.points.len();
        if len <= self.config.memory_threshold {
            return false;
        }

        let keep = len / 2;
        self.points.drain(..len - keep);
        true
    }

    pub fn stats(&self) -> HistoryStats {
        if self.points.is_empty() {
            return HistoryStats::default();
        }

        let values: Vec<u32> = self.points.iter().map(|p| p.latency).collect();
        let min = values.iter().copied().min().unwrap_or(0);
        let max = values.iter().copied().max().unwrap_or(0);
        let average = mean(&values).round() as u32;

        HistoryStats {
            min,
            max,
            average,
            trend: trend(&values),
        }
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            data_points: self.points.len(),
            max_allowed: self.config.max_data_points,
            memory_threshold: self.config.memory_threshold,
            last_update_ms: self.last_update_ms,
        }
    }
}

fn offset(latency: u32, delta: i64) -> u32 {
    (latency as i64 + delta).max(1) as u32
}

fn mean(values: &[u32]) -> f64 {
    values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64
}

/// Mean of the last five points vs. the five before them.
fn trend(values: &[u32]) -> Trend {
    let n = values.len();
    let recent = &values[n.saturating_sub(TREND_WINDOW)..];
    let older = &values[n.saturating_sub(2 * TREND_WINDOW)..n.saturating_sub(TREND_WINDOW)];

    if recent.is_empty() || older.is_empty() {
        return Trend::Stable;
    }

    let (recent_avg, older_avg) = (mean(recent), mean(older));
    if recent_avg > older_avg + TREND_THRESHOLD_MS {
        Trend::Increasing
    } else if recent_avg < older_avg - TREND_THRESHOLD_MS {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const NOW: u64 = 1_700_000_000_000;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(3)
    }

    fn buffer_with(values: &[u32]) -> HistoryBuffer {
        let mut buf = HistoryBuffer::new("Binance", 25, HistoryConfig::default());
        for (i, v) in values.iter().enumerate() {
            buf.push(HistoryPoint::new(NOW + i as u64, *v));
        }
        buf
    }

    #[test]
    fn seeding_backfills_thirty_minutes() {
        let buf = HistoryBuffer::seeded("Binance", 25, HistoryConfig::default(), NOW, &mut rng());

        assert_eq!(buf.len(), SEED_POINTS);
        assert_eq!(buf.latest().unwrap().ts_ms, NOW);
        assert_eq!(buf.points().next().unwrap().ts_ms, NOW - 29 * SEED_SPACING_MS);
        assert!(buf.points().all(|p| (20..=30).contains(&p.latency)));
    }

    #[test]
    fn seeding_respects_small_capacity() {
        let cfg = HistoryConfig {
            max_data_points: 10,
            ..HistoryConfig::default()
        };
        let buf = HistoryBuffer::seeded("OKX", 30, cfg, NOW, &mut rng());
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn random_walk_moves_at_most_four() {
        let mut buf = HistoryBuffer::seeded("Binance", 25, HistoryConfig::default(), NOW, &mut rng());
        let mut r = rng();

        for i in 1..=50 {
            let prev = buf.latest().unwrap().latency;
            let next = buf.push_next(NOW + i * 5_000, &mut r);
            assert!((next as i64 - prev as i64).abs() <= 4);
            assert!(next >= 1);
        }
    }

    #[test]
    fn random_walk_never_drops_below_one() {
        let mut buf = HistoryBuffer::new("Binance", 1, HistoryConfig::default());
        let mut r = rng();
        for i in 0..500 {
            assert!(buf.push_next(NOW + i, &mut r) >= 1);
        }
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let cfg = HistoryConfig {
            max_data_points: 3,
            ..HistoryConfig::default()
        };
        let mut buf = HistoryBuffer::new("Kraken", 22, cfg);
        for i in 0..5u64 {
            buf.push(HistoryPoint::new(NOW + i, 10 + i as u32));
        }

        let kept: Vec<u32> = buf.points().map(|p| p.latency).collect();
        assert_eq!(kept, vec![12, 13, 14]);
    }

    #[test]
    fn cleanup_drops_points_older_than_an_hour() {
        let mut buf = HistoryBuffer::new("Kraken", 22, HistoryConfig::default());
        buf.push(HistoryPoint::new(NOW - MAX_POINT_AGE_MS - 1, 10));
        buf.push(HistoryPoint::new(NOW - MAX_POINT_AGE_MS, 11));
        buf.push(HistoryPoint::new(NOW - 1_000, 12));

        let removed = buf.cleanup(NOW);

        assert_eq!(removed, 2);
        assert!(buf.points().all(|p| NOW - p.ts_ms < MAX_POINT_AGE_MS));
    }

    #[test]
    fn aggressive_cleanup_keeps_recent_half() {
        let cfg = HistoryConfig {
            max_data_points: 50,
            memory_threshold: 10,
            ..HistoryConfig::default()
        };
        let mut buf = HistoryBuffer::new("Bybit", 28, cfg);
        for i in 0..11u64 {
            buf.push(HistoryPoint::new(NOW + i, 1 + i as u32));
        }

        // The eleventh push crossed the threshold: 11 → 5.
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.latest().unwrap().latency, 11);
    }

    #[test]
    fn stats_report_min_max_average() {
        let buf = buffer_with(&[10, 20, 30]);
        let s = buf.stats();
        assert_eq!((s.min, s.max, s.average), (10, 30, 20));
        assert_eq!(s.trend, Trend::Stable);
    }

    #[test]
    fn trend_compares_last_five_to_previous_five() {
        assert_eq!(
            buffer_with(&[10, 10, 10, 10, 10, 20, 20, 20, 20, 20]).stats().trend,
            Trend::Increasing
        );
        assert_eq!(
            buffer_with(&[20, 20, 20, 20, 20, 10, 10, 10, 10, 10]).stats().trend,
            Trend::Decreasing
        );
        assert_eq!(
            buffer_with(&[10, 10, 10, 10, 10, 15, 15, 15, 15, 15]).stats().trend,
            Trend::Stable
        );
    }

    #[test]
    fn empty_stats_are_zeroed() {
        let buf = HistoryBuffer::new("FTX", 18, HistoryConfig::default());
        assert_eq!(buf.stats(), HistoryStats::default());
    }

    #[test]
    fn memory_usage_reports_config() {
        let buf = HistoryBuffer::seeded("FTX", 18, HistoryConfig::default(), NOW, &mut rng());
        let usage = buf.memory_usage();
        assert_eq!(usage.data_points, 30);
        assert_eq!(usage.max_allowed, 100);
        assert_eq!(usage.memory_threshold, 1_000);
        assert_eq!(usage.last_update_ms, NOW);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]
        #[test]
        fn never_exceeds_capacity(
            max_points in 1usize..150,
            threshold in 1usize..2_000,
            appends in 0usize..400,
            seed in any::<u64>(),
        ) {
            let cfg = HistoryConfig {
                max_data_points: max_points,
                memory_threshold: threshold,
                ..HistoryConfig::default()
            };
            let mut rng = StdRng::seed_from_u64(seed);
            let now = 1_700_000_000_000u64;
            let mut buf = HistoryBuffer::seeded("Binance", 25, cfg, now, &mut rng);

            for i in 0..appends {
                buf.push_next(now + i as u64 * 5_000, &mut rng);
                prop_assert!(buf.len() <= max_points);
            }

            let end = now + appends as u64 * 5_000 + MAX_POINT_AGE_MS / 2;
            buf.cleanup(end);
            prop_assert!(buf.len() <= max_points);
            prop_assert!(buf.points().all(|p| end - p.ts_ms < MAX_POINT_AGE_MS));
        }
    }
}
