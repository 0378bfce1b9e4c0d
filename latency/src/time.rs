use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, Utc};

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Converts epoch milliseconds into a UTC timestamp. Out-of-range input clamps to the epoch.
pub fn to_utc(ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms.min(i64::MAX as u64) as i64).unwrap_or_default()
}

/// Chart label for a history point: local `HH:MM`.
pub fn display_time(ms: u64) -> String {
    to_utc(ms).with_timezone(&Local).format("%H:%M").to_string()
}

/// Source of "now" for everything that ages, expires or stamps data.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;

    fn now_utc(&self) -> DateTime<Utc> {
        to_utc(self.now_ms())
    }
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        now_ms()
    }
}

/// Wall clock anchored at construction and advanced by tokio's clock, so it
/// follows `tokio::time::pause`/`advance` in tests while staying epoch-based.
#[derive(Clone, Copy, Debug)]
pub struct TokioClock {
    base_ms: u64,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base_ms: now_ms(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.base_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_sets() {
        let clock = ManualClock::new(1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn to_utc_roundtrips_millis() {
        let ts = to_utc(1_700_000_000_123);
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn display_time_is_hours_and_minutes() {
        let label = display_time(now_ms());
        assert_eq!(label.len(), 5);
        assert_eq!(&label[2..3], ":");
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let before = clock.now_ms();
        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        assert_eq!(clock.now_ms() - before, 2_000);
    }
}
