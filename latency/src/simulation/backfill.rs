use rand::Rng;

use crate::exchange::types::{HistoryPoint, TimeRange};

/// Synthetic chart history for `range`, oldest first, ending one step before `now_ms`.
///
/// Each point is `20 + U[0,30) + 5·sin(0.1·i) + U[-1.5,1.5)`, floored at 1 ms.
pub fn backfill_history<R: Rng + ?Sized>(
    range: TimeRange,
    now_ms: u64,
    rng: &mut R,
) -> Vec<HistoryPoint> {
    let n = range.backfill_points();
    let step = range.backfill_step_ms();

    (0..n)
        .map(|i| {
            let ts_ms = now_ms.saturating_sub((n - i) as u64 * step);
            let base = 20.0 + rng.gen_range(0.0..30.0);
            let variation = (i as f64 * 0.1).sin() * 5.0 + rng.gen_range(-1.5..1.5);
            let latency = (base + variation).round().max(1.0) as u32;
            HistoryPoint::new(ts_ms, latency)
        })
        .collect()
}
