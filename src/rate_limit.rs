use std::collections::VecDeque;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            time_window: Duration::from_secs(60),
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Sliding-window pacer: at most `max_requests` admissions within any
/// trailing `time_window`. Shared instances serialize check-and-record
/// through the mutex.
pub struct RateLimiter {
    max_requests: usize,
    time_window: Duration,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, time_window: Duration) -> Self {
        Self {
            // zero capacity could never admit anyone
            max_requests: max_requests.max(1) as usize,
            time_window,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until one more request fits in the trailing window, then records
    /// it. Iterative: sleeps outside the lock and re-checks, so concurrent
    /// callers cannot starve each other or overfill the window.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while let Some(oldest) = window.front() {
                    if now.duration_since(*oldest) >= self.time_window {
                        window.pop_front();
                    } else {
                        break;
                    }
                }
                if window.len() < self.max_requests {
                    window.push_back(now);
                    return;
                }
                match window.front() {
                    Some(oldest) => self
                        .time_window
                        .saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };
            if !wait.is_zero() {
                debug!("Rate limit reached, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
    }
}

struct ErrorState {
    consecutive_errors: u32,
    schedule: ExponentialBackoff<backoff::SystemClock>,
}

/// Pacing plus resilience: delegates admission to an inner [`RateLimiter`]
/// and escalates a backoff delay on every consecutive error until the retry
/// budget runs out. A success resets both the streak and the delay schedule.
pub struct AdaptiveRateLimiter {
    limiter: RateLimiter,
    max_retries: u32,
    base_delay: Duration,
    state: Mutex<ErrorState>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.max_requests, config.time_window),
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            state: Mutex::new(ErrorState {
                consecutive_errors: 0,
                schedule: Self::schedule(config.base_delay),
            }),
        }
    }

    fn schedule(base_delay: Duration) -> ExponentialBackoff<backoff::SystemClock> {
        ExponentialBackoff {
            current_interval: base_delay,
            initial_interval: base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: base_delay * 64,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    pub async fn acquire(&self) {
        self.limiter.acquire().await;
    }

    /// Registers one error. Sleeps `base_delay * 2^(n-1)` for the n-th
    /// consecutive error and returns Ok to signal "retry now"; once the streak
    /// exceeds `max_retries` the error comes straight back to the caller.
    pub async fn handle_error<E: std::fmt::Display>(&self, err: E) -> Result<(), E> {
        let delay = {
            let mut state = self.state.lock().await;
            state.consecutive_errors += 1;
            if state.consecutive_errors > self.max_retries {
                warn!("Max retries ({}) exceeded: {}", self.max_retries, err);
                return Err(err);
            }
            let delay = state.schedule.next_backoff().unwrap_or(self.base_delay);
            warn!(
                "Error {} of {}, retrying in {:?}: {}",
                state.consecutive_errors, self.max_retries, delay, err
            );
            delay
        };
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Clears the error streak after a successful request.
    pub async fn reset_errors(&self) {
        let mut state = self.state.lock().await;
        if state.consecutive_errors > 0 {
            debug!(
                "Error streak of {} cleared after success",
                state.consecutive_errors
            );
        }
        state.consecutive_errors = 0;
        state.schedule.reset();
    }

    pub async fn consecutive_errors(&self) -> u32 {
        self.state.lock().await.consecutive_errors
    }
}
