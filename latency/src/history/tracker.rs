use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, info, instrument};

use super::buffer::{HistoryBuffer, HistoryConfig, HistoryStats, MemoryUsage};
use crate::exchange::types::HistoryPoint;
use crate::time::Clock;

type SharedBuffer = Arc<Mutex<HistoryBuffer>>;

/// Live history for the currently selected exchange.
///
/// Owns the buffer and the two timers feeding it (append + cleanup). Every
/// (re)track aborts the previous timers before new ones are spawned, and each
/// tracking generation writes to its own buffer, so nothing carries over between
/// exchanges. Dropping the tracker aborts its timers.
pub struct HistoryTracker {
    config: HistoryConfig,
    clock: Arc<dyn Clock>,
    current: Option<SharedBuffer>,
    timers: Vec<JoinHandle<()>>,
}

impl HistoryTracker {
    pub fn new(config: HistoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            current: None,
            timers: Vec::new(),
        }
    }

    /// Starts (or restarts) tracking `exchange`. Must be called inside a tokio runtime.
    #[instrument(skip(self), target = "history")]
    pub fn track(&mut self, exchange: &str, initial_latency: u32) {
        self.cancel_timers();

        let seeded = HistoryBuffer::seeded(
            exchange,
            initial_latency,
            self.config,
            self.clock.now_ms(),
            &mut rand::thread_rng(),
        );
        let buffer = Arc::new(Mutex::new(seeded));

        self.timers.push(self.spawn_update_loop(Arc::clone(&buffer)));
        self.timers.push(self.spawn_cleanup_loop(Arc::clone(&buffer)));
        self.current = Some(buffer);

        info!(
            update_ms = self.config.update_interval.as_millis() as u64,
            cleanup_ms = self.config.cleanup_interval.as_millis() as u64,
            "history tracking started"
        );
    }

    /// Stops tracking and releases the buffer.
    #[instrument(skip(self), target = "history")]
    pub fn stop(&mut self) {
        self.cancel_timers();
        if let Some(buf) = self.current.take() {
            info!(exchange = %buf.lock().exchange(), "history tracking stopped");
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.current.is_some()
    }

    pub fn exchange(&self) -> Option<String> {
        self.current
            .as_ref()
            .map(|b| b.lock().exchange().to_string())
    }

    /// Timers still alive; at most two while tracking.
    pub fn active_timers(&self) -> usize {
        self.timers.iter().filter(|t| !t.is_finished()).count()
    }

    pub fn snapshot(&self) -> Vec<HistoryPoint> {
        self.current
            .as_ref()
            .map(|b| b.lock().to_vec())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> HistoryStats {
        self.current
            .as_ref()
            .map(|b| b.lock().stats())
            .unwrap_or_default()
    }

    pub fn memory_usage(&self) -> Option<MemoryUsage> {
        self.current.as_ref().map(|b| b.lock().memory_usage())
    }

    /// Runs the cleanup pass immediately; returns the number of points removed.
    pub fn manual_cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        self.current
            .as_ref()
            .map(|b| b.lock().cleanup(now))
            .unwrap_or(0)
    }

    fn cancel_timers(&mut self) {
        for t in self.timers.drain(..) {
            t.abort();
        }
    }

    fn spawn_update_loop(&self, buffer: SharedBuffer) -> JoinHandle<()> {
        let clock = Arc::clone(&self.clock);
        let period = self.config.update_interval;
        let start = Instant::now() + period;
        let span = tracing::debug_span!("history_update", exchange = %buffer.lock().exchange());

        tokio::spawn(
            async move {
                let mut rng = StdRng::from_entropy();
                let mut ticker = every(start, period);

                loop {
                    ticker.tick().await;
                    let latency = buffer.lock().push_next(clock.now_ms(), &mut rng);
                    debug!(latency, "history point appended");
                }
            }
            .instrument(span),
        )
    }

    fn spawn_cleanup_loop(&self, buffer: SharedBuffer) -> JoinHandle<()> {
        let clock = Arc::clone(&self.clock);
        let period = self.config.cleanup_interval;
        let start = Instant::now() + period;
        let span = tracing::debug_span!("history_cleanup", exchange = %buffer.lock().exchange());

        tokio::spawn(
            async move {
                let mut ticker = every(start, period);

                loop {
                    ticker.tick().await;
                    let removed = buffer.lock().cleanup(clock.now_ms());
                    if removed > 0 {
                        debug!(removed, "stale history points pruned");
                    }
                }
            }
            .instrument(span),
        )
    }
}

impl Drop for HistoryTracker {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

fn every(start: Instant, period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
