use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::api::errors::ApiError;

pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(3);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const VERIFY_PATH: &str = "/user/tokens/verify";

/// Result of a successful token verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStatus {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

/// Thin HTTP layer: knows URLs and payload shapes, nothing about caching,
/// rate limits or fallbacks.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    #[instrument(skip(self), target = "gateway", level = "debug")]
    pub async fn verify_token(&self) -> Result<TokenStatus, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::MissingToken)?;
        let url = format!("{}{}", self.base_url, VERIFY_PATH);

        let request = self.http.get(&url).bearer_auth(token).send();
        let resp = tokio::time::timeout(VERIFY_TIMEOUT, request)
            .await
            .map_err(|_| ApiError::Timeout(VERIFY_TIMEOUT))??;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ApiError::TokenRejected(
                    "invalid api token, check the configured credential".into(),
                ));
            }
            s if !s.is_success() => return Err(ApiError::Status(s.as_u16())),
            _ => {}
        }

        let body = resp.bytes().await?;
        let status = parse_verification(&body)?;

        debug!(token_id = %status.id, status = %status.status, "token verified");
        Ok(status)
    }

    /// Round-trip time of a GET against `url`. Any non-2xx counts as failure.
    #[instrument(skip(self), target = "gateway", level = "debug")]
    pub async fn probe(&self, url: &str) -> Result<Duration, ApiError> {
        let start = Instant::now();

        let resp = tokio::time::timeout(PROBE_TIMEOUT, self.http.get(url).send())
            .await
            .map_err(|_| ApiError::Timeout(PROBE_TIMEOUT))??;

        if !resp.status().is_success() {
            return Err(ApiError::Status(resp.status().as_u16()));
        }

        let elapsed = start.elapsed();
        debug!(elapsed_ms = elapsed.as_millis() as u64, "probe ok");
        Ok(elapsed)
    }
}

/// Decodes the `{success, result, errors}` envelope of the verify endpoint.
pub(crate) fn parse_verification(body: &[u8]) -> Result<TokenStatus, ApiError> {
    let envelope: Envelope<TokenStatus> = serde_json::from_slice(body)?;

    if !envelope.success {
        let reason = envelope
            .errors
            .iter()
            .map(|e| match e {
                serde_json::Value::String(s) => s.clone(),
                other => other
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            })
            .collect::<Vec<_>>()
            .join(", ");

        return Err(ApiError::TokenRejected(if reason.is_empty() {
            "token verification failed".into()
        } else {
            reason
        }));
    }

    envelope
        .result
        .ok_or_else(|| ApiError::InvalidResponse("verification result missing".into()))
}
