pub mod cache;
pub mod client;
pub mod errors;
pub mod gateway;
pub mod rate_limiter;

pub use cache::{CacheStats, ClientCache};
pub use client::{TokenStatus, UpstreamClient};
pub use errors::ApiError;
pub use gateway::{ApiGateway, CachedPayload, LatencySource};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
