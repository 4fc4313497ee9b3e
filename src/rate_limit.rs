//! Rate Limiter
//! カタログ API 呼び出しの固定ウィンドウ制限（60 秒あたり N 回）

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::SyncError;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Window {
    calls: u32,
    reset_at: Instant,
}

/// Fixed-window counter. Rejects instead of waiting; bursts at the window
/// boundary are allowed.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls_per_minute: u32,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(max_calls_per_minute: u32) -> Self {
        Self {
            max_calls_per_minute,
            window: Mutex::new(Window {
                calls: 0,
                reset_at: Instant::now() + WINDOW,
            }),
        }
    }

    pub fn max_calls_per_minute(&self) -> u32 {
        self.max_calls_per_minute
    }

    /// Counts one call against the current window.
    pub fn check_limit(&self) -> Result<(), SyncError> {
        self.check_limit_at(Instant::now())
    }

    pub(crate) fn check_limit_at(&self, now: Instant) -> Result<(), SyncError> {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());

        if now >= window.reset_at {
            window.calls = 0;
            window.reset_at = now + WINDOW;
        }

        if window.calls >= self.max_calls_per_minute {
            let wait = window.reset_at.saturating_duration_since(now);
            debug!("Rate limit reached, {}s left in window", wait.as_secs());
            return Err(SyncError::RateLimitExceeded {
                retry_after_seconds: wait.as_secs(),
            });
        }

        window.calls += 1;
        Ok(())
    }
}
