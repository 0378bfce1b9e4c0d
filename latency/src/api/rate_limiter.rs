use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use super::errors::ApiError;
use crate::time::Clock;

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_millis(60_000),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct WindowState {
    request_count: u32,
    window_reset_at_ms: u64,
}

/// Fixed-window limiter keyed by logical operation name.
///
/// The first call for a key, or the first call after its window elapsed, opens a
/// new window with a count of 1. Within a window calls are admitted while the
/// count is below `max_requests`.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn is_allowed(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();

        if let Some(state) = windows.get_mut(key) {
            if now <= state.window_reset_at_ms {
                if state.request_count >= self.config.max_requests {
                    return false;
                }
                state.request_count += 1;
                return true;
            }
        }

        windows.insert(
            key.to_string(),
            WindowState {
                request_count: 1,
                window_reset_at_ms: now + self.config.window.as_millis() as u64,
            },
        );
        true
    }

    /// `is_allowed` as a `Result`, for call sites that propagate with `?`.
    pub fn check(&self, key: &str) -> Result<(), ApiError> {
        if self.is_allowed(key) {
            Ok(())
        } else {
            warn!(target: "rate_limit", key, "rate limit exceeded");
            Err(ApiError::RateLimited {
                key: key.to_string(),
            })
        }
    }

    /// Calls left in the current window.
    pub fn remaining(&self, key: &str) -> u32 {
        self.windows
            .lock()
            .get(key)
            .map(|s| self.config.max_requests.saturating_sub(s.request_count))
            .unwrap_or(self.config.max_requests)
    }

    /// When the current window for `key` closes; now if there is none.
    pub fn reset_at_ms(&self, key: &str) -> u64 {
        self.windows
            .lock()
            .get(key)
            .map(|s| s.window_reset_at_ms)
            .unwrap_or_else(|| self.clock.now_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    fn limiter(max: u32, window_ms: u64) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(10_000));
        let cfg = RateLimitConfig {
            max_requests: max,
            window: Duration::from_millis(window_ms),
        };
        (clock.clone(), RateLimiter::new(cfg, clock))
    }

    #[test]
    fn denies_after_max_within_window() {
        let (_, rl) = limiter(3, 1_000);
        assert!(rl.is_allowed("op"));
        assert!(rl.is_allowed("op"));
        assert!(rl.is_allowed("op"));
        assert!(!rl.is_allowed("op"));
        assert_eq!(rl.remaining("op"), 0);
    }

    #[test]
    fn window_resets_after_elapsing() {
        let (clock, rl) = limiter(3, 1_000);
        for _ in 0..4 {
            rl.is_allowed("op");
        }

        clock.advance(1_001);
        assert!(rl.is_allowed("op"));
        assert_eq!(rl.remaining("op"), 2);
        assert_eq!(rl.reset_at_ms("op"), 10_000 + 1_001 + 1_000);
    }

    #[test]
    fn keys_are_independent() {
        let (_, rl) = limiter(1, 1_000);
        assert!(rl.is_allowed("a"));
        assert!(!rl.is_allowed("a"));
        assert!(rl.is_allowed("b"));
    }

    #[test]
    fn check_maps_denial_to_error() {
        let (_, rl) = limiter(1, 1_000);
        assert!(rl.check("verify-token").is_ok());
        let err = rl.check("verify-token").unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { ref key } if key == "verify-token"));
    }

    #[test]
    fn unknown_key_reports_full_budget() {
        let (clock, rl) = limiter(100, 60_000);
        assert_eq!(rl.remaining("nothing"), 100);
        assert_eq!(rl.reset_at_ms("nothing"), clock.now_ms());
    }
}
