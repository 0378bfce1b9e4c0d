//! Values derived from [`LatencyState`] on read. Nothing here is stored.

use serde::Serialize;

use crate::exchange::types::{LatencyRecord, LatencyTier};
use crate::store::state::LatencyState;

pub fn average_latency(state: &LatencyState) -> f64 {
    if state.records.is_empty() {
        return 0.0;
    }
    let sum: u64 = state.records.iter().map(|r| u64::from(r.latency)).sum();
    sum as f64 / state.records.len() as f64
}

pub fn exchange_count(state: &LatencyState) -> usize {
    state.records.len()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TierBuckets {
    pub excellent: Vec<LatencyRecord>,
    pub good: Vec<LatencyRecord>,
    pub poor: Vec<LatencyRecord>,
}

pub fn by_tier(state: &LatencyState) -> TierBuckets {
    let mut buckets = TierBuckets::default();
    for r in state.records.iter() {
        match r.tier() {
            LatencyTier::Excellent => buckets.excellent.push(r.clone()),
            LatencyTier::Good => buckets.good.push(r.clone()),
            LatencyTier::Poor => buckets.poor.push(r.clone()),
        }
    }
    buckets
}
