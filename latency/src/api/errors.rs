use std::time::Duration;

use thiserror::Error;

use crate::error::AppError;

/// Everything that can go wrong talking to an upstream endpoint.
///
/// None of these are fatal: the refresh orchestrator converts every variant
/// into a simulated snapshot.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("no api token configured")]
    MissingToken,

    #[error("token rejected: {0}")]
    TokenRejected(String),

    #[error("rate limit exceeded for {key}. Try again later.")]
    RateLimited { key: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Generation(#[from] AppError),
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
