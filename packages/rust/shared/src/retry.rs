//! Bounded exponential backoff for provider calls.
//!
//! Retry loops are explicit: the caller hands [`retry`] a closure that
//! performs one attempt, a [`RetryPolicy`], and a [`Clock`]. Production code
//! uses [`TokioClock`]; tests use [`ManualClock`], which records the requested
//! sleeps and advances virtual time instantly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RetryConfig;
use crate::error::{ProviderError, ProviderResult};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Backoff parameters for one retrying stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Wall-clock cap for the whole stage, sleeps included.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            max_elapsed: Duration::from_millis(config.max_elapsed_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries `max_retries` times without waiting.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_elapsed: Duration::from_secs(3600),
        }
    }

    /// Delay before retry number `retry` (1-based): `initial * multiplier^(retry-1)`,
    /// capped at `max_backoff`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of time and sleeping for retry loops.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real time, backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual time: `sleep` returns immediately and advances `now`.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        self.lock().offset += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.lock().offset
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        {
            let mut state = self.lock();
            state.offset += duration;
            state.sleeps.push(duration);
        }
        Box::pin(std::future::ready(()))
    }
}

// ---------------------------------------------------------------------------
// Retry loop
// ---------------------------------------------------------------------------

/// Why a retry loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUp {
    NotRetryable,
    AttemptsExhausted,
    DeadlineExceeded,
}

impl std::fmt::Display for GiveUp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotRetryable => "not retryable",
            Self::AttemptsExhausted => "retries exhausted",
            Self::DeadlineExceeded => "deadline exceeded",
        };
        f.write_str(s)
    }
}

/// The last provider error of a failed retry loop.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason} after {attempts} attempt(s): {last}")]
pub struct RetryError {
    pub attempts: u32,
    pub last: ProviderError,
    pub reason: GiveUp,
}

/// Run `op` until it succeeds, returns a non-retryable error, runs out of
/// retries, or would overrun `policy.max_elapsed`.
///
/// `op` receives the 1-based attempt number. A `Retry-After` hint on a
/// rate-limit error raises the computed delay, capped at `max_backoff`.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    stage: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let start = clock.now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let give_up = |reason| RetryError {
            attempts: attempt,
            last: err.clone(),
            reason,
        };

        if !err.is_retryable() {
            return Err(give_up(GiveUp::NotRetryable));
        }
        if attempt > policy.max_retries {
            return Err(give_up(GiveUp::AttemptsExhausted));
        }

        let mut delay = policy.delay_for(attempt);
        if let Some(hint) = err.retry_after() {
            delay = delay.max(hint.min(policy.max_backoff));
        }

        let elapsed = clock.now().saturating_duration_since(start);
        if elapsed + delay > policy.max_elapsed {
            return Err(give_up(GiveUp::DeadlineExceeded));
        }

        tracing::warn!(
            stage,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "provider call failed, backing off"
        );
        clock.sleep(delay).await;
    }
}
