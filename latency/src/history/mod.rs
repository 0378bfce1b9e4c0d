pub mod buffer;
pub mod tracker;

pub use buffer::{HistoryBuffer, HistoryConfig, HistoryStats, MemoryUsage, Trend};
pub use tracker::HistoryTracker;
