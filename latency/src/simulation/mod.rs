pub mod backfill;
pub mod generator;

use std::sync::Arc;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, instrument};

use crate::error::AppError;
use crate::exchange::types::{HistoryPoint, LatencyRecord, TimeRange};
use crate::exchange::{EXCHANGES, ExchangeSpec};
use crate::time::Clock;
use generator::{NoiseSource, RandomNoise};

/// Thread-safe facade over the generator: owns the exchange table, the noise
/// source and the clock used to stamp records.
pub struct Simulator {
    table: Vec<ExchangeSpec>,
    noise: Mutex<Box<dyn NoiseSource + Send>>,
    clock: Arc<dyn Clock>,
}

impl Simulator {
    /// Full exchange table with entropy-seeded noise.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_noise(
            EXCHANGES.to_vec(),
            Box::new(RandomNoise::new(StdRng::from_entropy())),
            clock,
        )
    }

    pub fn with_noise(
        table: Vec<ExchangeSpec>,
        noise: Box<dyn NoiseSource + Send>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table,
            noise: Mutex::new(noise),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn table(&self) -> &[ExchangeSpec] {
        &self.table
    }

    pub fn find(&self, name: &str) -> Option<&ExchangeSpec> {
        self.table.iter().find(|e| e.name == name)
    }

    /// One fresh record per configured exchange.
    #[instrument(skip(self), target = "simulation", fields(exchanges = self.table.len()))]
    pub fn generate(&self) -> Result<Vec<LatencyRecord>, AppError> {
        if self.table.is_empty() {
            return Err(AppError::Generation("no exchanges configured".into()));
        }

        let now = self.clock.now_utc();
        let records = generator::generate(&self.table, now, self.noise.lock().as_mut());

        debug!(count = records.len(), "simulated latency snapshot generated");
        Ok(records)
    }

    /// Simulated stand-in for a single exchange.
    pub fn simulate_exchange(&self, spec: &ExchangeSpec) -> LatencyRecord {
        let now = self.clock.now_utc();
        generator::simulate_one(spec, now, self.noise.lock().as_mut())
    }

    /// Chart history for `range` ending now.
    pub fn backfill(&self, range: TimeRange) -> Vec<HistoryPoint> {
        backfill::backfill_history(range, self.clock.now_ms(), &mut rand::thread_rng())
    }
}
