pub mod api;
pub mod config;
pub mod error;
pub mod exchange;
pub mod export;
pub mod history;
pub mod metrics;
pub mod refresh;
pub mod simulation;
pub mod store;
pub mod time;
