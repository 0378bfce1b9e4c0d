//! Upstream access with rate limiting, caching and health accounting layered
//! over [`UpstreamClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::logger::{child_span, warn_if_slow};
use futures::future::join_all;
use tracing::{Instrument, debug, info, instrument, warn};

use crate::api::cache::ClientCache;
use crate::api::client::{TokenStatus, UpstreamClient};
use crate::api::errors::ApiError;
use crate::api::rate_limiter::RateLimiter;
use crate::exchange::ExchangeSpec;
use crate::exchange::types::LatencyRecord;
use crate::metrics::health::HealthMonitor;
use crate::simulation::Simulator;

pub const VERIFY_TOKEN_KEY: &str = "verify-token";
pub const LATENCY_DATA_KEY: &str = "latency-data";

pub const TOKEN_CACHE_TTL: Duration = Duration::from_millis(300_000);
pub const LATENCY_CACHE_TTL: Duration = Duration::from_millis(30_000);

const SLOW_UPSTREAM: Duration = Duration::from_secs(2);

/// What the gateway keeps in its cache.
#[derive(Clone, Debug)]
pub enum CachedPayload {
    Token(TokenStatus),
    Latency(Arc<Vec<LatencyRecord>>),
}

/// Where latency snapshots come from. The refresh orchestrator only sees this.
#[async_trait]
pub trait LatencySource: Send + Sync {
    async fn verify_token(&self) -> Result<TokenStatus, ApiError>;

    async fn fetch_latency(&self, use_real: bool) -> Result<Arc<Vec<LatencyRecord>>, ApiError>;
}

pub struct ApiGateway {
    client: UpstreamClient,
    cache: Arc<ClientCache<CachedPayload>>,
    limiter: Arc<RateLimiter>,
    health: Arc<HealthMonitor>,
    simulator: Arc<Simulator>,
}

impl ApiGateway {
    pub fn new(
        client: UpstreamClient,
        cache: Arc<ClientCache<CachedPayload>>,
        limiter: Arc<RateLimiter>,
        health: Arc<HealthMonitor>,
        simulator: Arc<Simulator>,
    ) -> Self {
        Self {
            client,
            cache,
            limiter,
            health,
            simulator,
        }
    }

    pub fn cache(&self) -> &Arc<ClientCache<CachedPayload>> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    async fn measure(&self, spec: &ExchangeSpec) -> LatencyRecord {
        let Some(url) = spec.probe_url else {
            return self.simulator.simulate_exchange(spec);
        };

        match self.client.probe(url).await {
            Ok(rtt) => {
                let ms = u32::try_from(rtt.as_millis()).unwrap_or(u32::MAX);
                debug!(exchange = spec.name, latency_ms = ms, "real latency measured");
                LatencyRecord::from_spec(spec, ms, self.simulator.clock().now_utc())
            }
            Err(e) => {
                warn!(
                    exchange = spec.name,
                    error = %e,
                    "probe failed, using simulated value"
                );
                self.simulator.simulate_exchange(spec)
            }
        }
    }

    async fn measure_all(&self) -> Vec<LatencyRecord> {
        join_all(self.simulator.table().iter().map(|spec| {
            let span = child_span("probe");
            span.record("exchange", spec.name);
            self.measure(spec).instrument(span)
        }))
        .await
    }
}

fn latency_cache_key(use_real: bool) -> String {
    format!("{LATENCY_DATA_KEY}{{\"useRealMeasurement\":{use_real}}}")
}

#[async_trait]
impl LatencySource for ApiGateway {
    #[instrument(skip(self), target = "gateway")]
    async fn verify_token(&self) -> Result<TokenStatus, ApiError> {
        self.limiter.check(VERIFY_TOKEN_KEY)?;

        if let Some(CachedPayload::Token(status)) = self.cache.get(VERIFY_TOKEN_KEY) {
            debug!("token verification served from cache");
            return Ok(status);
        }

        let status = self
            .health
            .with_health_monitoring(
                VERIFY_TOKEN_KEY,
                warn_if_slow("verify_token", SLOW_UPSTREAM, self.client.verify_token()),
            )
            .await?;

        self.cache.set(
            VERIFY_TOKEN_KEY,
            CachedPayload::Token(status.clone()),
            TOKEN_CACHE_TTL,
        );
        info!(token_id = %status.id, "api token verified");
        Ok(status)
    }

    #[instrument(skip(self), target = "gateway")]
    async fn fetch_latency(&self, use_real: bool) -> Result<Arc<Vec<LatencyRecord>>, ApiError> {
        self.limiter.check(LATENCY_DATA_KEY)?;

        let key = latency_cache_key(use_real);
        if let Some(CachedPayload::Latency(records)) = self.cache.get(&key) {
            debug!(%key, "latency served from cache");
            return Ok(records);
        }

        let records = self
            .health
            .with_health_monitoring(LATENCY_DATA_KEY, async {
                if use_real {
                    Ok::<_, ApiError>(
                        warn_if_slow("measure_all", SLOW_UPSTREAM, self.measure_all()).await,
                    )
                } else {
                    Ok(self.simulator.generate()?)
                }
            })
            .await?;

        let records = Arc::new(records);
        self.cache
            .set(key, CachedPayload::Latency(records.clone()), LATENCY_CACHE_TTL);

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::rate_limiter::RateLimitConfig;
    use crate::exchange::EXCHANGES;
    use crate::time::{Clock, ManualClock};

    fn gateway(max_requests: u32) -> (Arc<ManualClock>, ApiGateway) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let gw = ApiGateway::new(
            UpstreamClient::new("http://127.0.0.1:9", None).unwrap(),
            Arc::new(ClientCache::new(dyn_clock.clone())),
            Arc::new(RateLimiter::new(
                RateLimitConfig {
                    max_requests,
                    window: Duration::from_secs(60),
                },
                dyn_clock.clone(),
            )),
            Arc::new(HealthMonitor::new(dyn_clock.clone())),
            Arc::new(Simulator::new(dyn_clock)),
        );
        (clock, gw)
    }

    #[test]
    fn cache_key_carries_parameters() {
        assert_eq!(
            latency_cache_key(true),
            r#"latency-data{"useRealMeasurement":true}"#
        );
    }

    #[tokio::test]
    async fn simulated_fetch_is_cached_for_thirty_seconds() {
        let (clock, gw) = gateway(100);

        let first = gw.fetch_latency(false).await.unwrap();
        assert_eq!(first.len(), EXCHANGES.len());

        let second = gw.fetch_latency(false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        clock.advance(30_001);
        let third = gw.fetch_latency(false).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));

        let stats = gw.health().endpoint_health(LATENCY_DATA_KEY).unwrap();
        assert_eq!(stats.success_count, 2);
    }

    #[tokio::test]
    async fn rate_limit_applies_before_cache() {
        let (_, gw) = gateway(1);
        gw.fetch_latency(false).await.unwrap();

        match gw.fetch_latency(false).await {
            Err(ApiError::RateLimited { key }) => assert_eq!(key, LATENCY_DATA_KEY),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_token_is_recorded_as_failure() {
        let (_, gw) = gateway(100);

        assert!(matches!(
            gw.verify_token().await,
            Err(ApiError::MissingToken)
        ));
        let stats = gw.health().endpoint_health(VERIFY_TOKEN_KEY).unwrap();
        assert_eq!(stats.error_count, 1);
        assert!(gw.cache().get(VERIFY_TOKEN_KEY).is_none());
    }
}
