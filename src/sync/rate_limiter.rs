//! Request pacing for the remote API.
//!
//! Two independent layers gate every remote call:
//! - a sliding window capping requests per fixed duration, and
//! - a global backoff armed by 429 responses, which escalates with each
//!   consecutive hit and takes precedence over the window.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Cancelled;

/// Configuration for the request rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests per sliding window.
    pub max_requests: usize,
    /// Sliding window duration.
    pub window: Duration,
    /// Backoff grows by this much per consecutive 429.
    pub backoff_step: Duration,
    /// Backoff never exceeds this.
    pub backoff_cap: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 90,
            window: Duration::from_secs(30),
            backoff_step: Duration::from_secs(60),
            backoff_cap: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Default)]
struct BackoffState {
    /// Consecutive 429 hits since the last successful request.
    hits: u32,
    until: Option<Instant>,
}

/// Request pacer. One instance per run; independent runs never share
/// backoff state.
pub struct RateLimiter {
    /// Timestamps of issued requests, oldest first.
    requests: Mutex<VecDeque<Instant>>,
    backoff: StdMutex<BackoffState>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            requests: Mutex::new(VecDeque::new()),
            backoff: StdMutex::new(BackoffState::default()),
            config,
        }
    }

    /// Suspend until it is safe to issue one remote request, then claim the
    /// slot. Any active backoff window is slept out first.
    pub async fn await_slot(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            let backoff_wait = {
                let backoff = self.backoff.lock().unwrap();
                backoff
                    .until
                    .map(|until| until.saturating_duration_since(Instant::now()))
                    .filter(|wait| !wait.is_zero())
            };
            match backoff_wait {
                Some(wait) => {
                    debug!("Waiting out global backoff for {:?}", wait);
                    sleep_or_cancel(wait, cancel).await?;
                }
                None => break,
            }
        }

        loop {
            let window_wait = {
                let mut requests = self.requests.lock().await;
                let now = Instant::now();
                Self::evict_expired(&mut requests, now, self.config.window);

                if requests.len() < self.config.max_requests {
                    requests.push_back(now);
                    None
                } else {
                    // Safe: len >= max_requests >= 1.
                    let oldest = requests[0];
                    Some((oldest + self.config.window).saturating_duration_since(now))
                }
            };
            match window_wait {
                None => return Ok(()),
                Some(wait) => {
                    debug!("Request window full, waiting {:?}", wait);
                    sleep_or_cancel(wait, cancel).await?;
                }
            }
        }
    }

    /// Arm (or extend) the global backoff after a 429. Returns the window
    /// that was set.
    pub fn trigger_backoff(&self) -> Duration {
        let mut backoff = self.backoff.lock().unwrap();
        backoff.hits += 1;
        let window = std::cmp::min(
            self.config.backoff_step * backoff.hits,
            self.config.backoff_cap,
        );
        backoff.until = Some(Instant::now() + window);
        window
    }

    /// Clear the backoff after a successful request.
    pub fn reset_backoff(&self) {
        let mut backoff = self.backoff.lock().unwrap();
        if backoff.hits != 0 {
            backoff.hits = 0;
            backoff.until = None;
        }
    }

    fn evict_expired(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = requests.front() {
            if now.saturating_duration_since(*front) >= window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }
}

async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}
