//! Synthetic latency model.
//!
//! Per cycle:  `latency = max(1, round((base + geo) * time_mult * congestion + jitter + spike))`
//!
//! - `geo`        → `min(20, sqrt(lat² + lng²) * 0.1)`
//! - `time_mult`  → time-of-day / day-of-week band, drawn once per cycle
//! - `congestion` → discrete severity distribution, drawn once per cycle
//! - `jitter`     → U[-10, 10] per exchange
//! - `spike`      → 1% chance of U[50, 100) per exchange

use chrono::{DateTime, Datelike, Local, Timelike, Utc, Weekday};
use rand::Rng;

use crate::exchange::types::LatencyRecord;
use crate::exchange::{ExchangeSpec, Location};

pub const MAX_GEO_FACTOR_MS: f64 = 20.0;
pub const SPIKE_PROBABILITY: f64 = 0.01;

/// Distance proxy: monotone in `|(lat, lng)|`, capped at 20 ms.
pub fn geographic_factor(location: Location) -> f64 {
    let distance = (location.lat.powi(2) + location.lng.powi(2)).sqrt();
    (distance * 0.1).min(MAX_GEO_FACTOR_MS)
}

/// Multiplier band for the given local hour and weekday.
pub fn time_band(hour: u32, weekday: Weekday) -> (f64, f64) {
    if matches!(weekday, Weekday::Sat | Weekday::Sun) {
        return (0.9, 1.0);
    }
    match hour {
        9..=11 => (1.2, 1.4),
        14..=16 => (1.1, 1.3),
        19..=22 => (1.3, 1.5),
        23 | 0..=6 => (0.8, 1.0),
        _ => (1.0, 1.1),
    }
}

/// Maps a uniform draw in [0, 1) to a congestion band.
///
/// 5% severe, 10% moderate, 15% light, 70% normal.
pub fn congestion_band(draw: f64) -> (f64, f64) {
    if draw < 0.05 {
        (1.5, 2.0)
    } else if draw < 0.15 {
        (1.2, 1.4)
    } else if draw < 0.30 {
        (1.05, 1.15)
    } else {
        (0.95, 1.05)
    }
}

/// Randomness behind one generation. Tests swap in fixed values.
pub trait NoiseSource {
    fn time_multiplier(&mut self, hour: u32, weekday: Weekday) -> f64;
    fn congestion_factor(&mut self) -> f64;
    fn jitter_ms(&mut self) -> f64;
    fn spike_ms(&mut self) -> f64;
}

/// Noise drawn from an `rand::Rng`.
pub struct RandomNoise<R> {
    rng: R,
}

impl<R: Rng> RandomNoise<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    fn uniform(&mut self, (lo, hi): (f64, f64)) -> f64 {
        self.rng.gen_range(lo..hi)
    }
}

impl<R: Rng> NoiseSource for RandomNoise<R> {
    fn time_multiplier(&mut self, hour: u32, weekday: Weekday) -> f64 {
        self.uniform(time_band(hour, weekday))
    }

    fn congestion_factor(&mut self) -> f64 {
        let draw = self.rng.gen_range(0.0..1.0);
        self.uniform(congestion_band(draw))
    }

    fn jitter_ms(&mut self) -> f64 {
        self.rng.gen_range(-10.0..=10.0)
    }

    fn spike_ms(&mut self) -> f64 {
        if self.rng.gen_bool(SPIKE_PROBABILITY) {
            self.uniform((50.0, 100.0))
        } else {
            0.0
        }
    }
}

/// Noise with every factor pinned; used for reproducible scenarios.
#[derive(Clone, Copy, Debug)]
pub struct FixedNoise {
    pub time_multiplier: f64,
    pub congestion: f64,
    pub jitter_ms: f64,
    pub spike_ms: f64,
}

impl FixedNoise {
    /// Multipliers at 1.0, no jitter, no spike.
    pub fn neutral() -> Self {
        Self {
            time_multiplier: 1.0,
            congestion: 1.0,
            jitter_ms: 0.0,
            spike_ms: 0.0,
        }
    }
}

impl NoiseSource for FixedNoise {
    fn time_multiplier(&mut self, _hour: u32, _weekday: Weekday) -> f64 {
        self.time_multiplier
    }
    fn congestion_factor(&mut self) -> f64 {
        self.congestion
    }
    fn jitter_ms(&mut self) -> f64 {
        self.jitter_ms
    }
    fn spike_ms(&mut self) -> f64 {
        self.spike_ms
    }
}

/// Final latency for one exchange once every factor is known.
pub fn compose_latency(
    base_latency_ms: u32,
    location: Location,
    time_multiplier: f64,
    congestion: f64,
    jitter_ms: f64,
    spike_ms: f64,
) -> u32 {
    let shaped = (base_latency_ms as f64 + geographic_factor(location)) * time_multiplier * congestion;
    let value = (shaped + jitter_ms + spike_ms).round();

    if value.is_nan() || value < 1.0 {
        1
    } else {
        // Saturating cast: absurd spikes pin to u32::MAX instead of wrapping.
        value as u32
    }
}

/// One record per table entry, in table order, stamped with `now`.
pub fn generate<N: NoiseSource + ?Sized>(
    table: &[ExchangeSpec],
    now: DateTime<Utc>,
    noise: &mut N,
) -> Vec<LatencyRecord> {
    let local = now.with_timezone(&Local);
    let time_multiplier = noise.time_multiplier(local.hour(), local.weekday());
    let congestion = noise.congestion_factor();

    table
        .iter()
        .map(|spec| {
            let latency = compose_latency(
                spec.base_latency_ms,
                spec.location,
                time_multiplier,
                congestion,
                noise.jitter_ms(),
                noise.spike_ms(),
            );
            LatencyRecord::from_spec(spec, latency, now)
        })
        .collect()
}

/// Latency for a single exchange outside a full cycle (probe fallback).
pub fn simulate_one<N: NoiseSource + ?Sized>(
    spec: &ExchangeSpec,
    now: DateTime<Utc>,
    noise: &mut N,
) -> LatencyRecord {
    let local = now.with_timezone(&Local);
    let latency = compose_latency(
        spec.base_latency_ms,
        spec.location,
        noise.time_multiplier(local.hour(), local.weekday()),
        noise.congestion_factor(),
        noise.jitter_ms(),
        noise.spike_ms(),
    );
    LatencyRecord::from_spec(spec, latency, now)
}
