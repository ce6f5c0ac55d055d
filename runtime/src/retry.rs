//! Retrying commands that lost an optimistic-concurrency race.
//!
//! A command that fails with [`ConsistencyError::OptimisticConflict`] was
//! based on a snapshot that has moved on. The fix is to rerun the *whole*
//! command, including the snapshot load, so the closure passed to
//! [`retry_on_conflict`] must reload its state on every call.
//!
//! # Example
//!
//! ```rust
//! use eventloom_runtime::retry::{RetryPolicy, retry_on_conflict};
//! use std::time::Duration;
//!
//! # async fn example() -> eventloom_core::Result<()> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(20))
//!     .build();
//!
//! let version = retry_on_conflict(&policy, || async {
//!     // load snapshot, run the command handler, publish
//!     Ok(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use eventloom_core::error::{ConsistencyError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How often and how fast to retry.
///
/// # Default Values
///
/// - `max_attempts`: 3 (the first call plus two retries)
/// - `initial_delay`: 50ms
/// - `max_delay`: 2 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: true (delay scaled by a random factor in `[0.5, 1.0]`)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of calls, including the first one.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap for exponential backoff.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Spread concurrent retries of the same aggregate apart.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: None,
        }
    }

    /// Delay before retry number `retry` (0-based), without jitter.
    ///
    /// `initial_delay * multiplier^retry`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap_ms = self.max_delay.as_millis() as f64;

        Duration::from_millis(delay_ms.min(cap_ms) as u64)
    }

    fn sleep_duration(&self, retry: usize) -> Duration {
        let delay = self.delay_for_retry(retry);
        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<bool>,
}

impl RetryPolicyBuilder {
    /// Set the total number of calls. Values below 1 are treated as 1.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the cap for exponential backoff.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(3).max(1),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(50)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(2)),
            multiplier: self.multiplier.unwrap_or(2.0),
            jitter: self.jitter.unwrap_or(true),
        }
    }
}

/// Call `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or `policy.max_attempts` calls have been made.
///
/// # Errors
///
/// The first non-retryable error, or the last error once attempts are exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if !is_retryable(&err) => return Err(err),
            Err(err) if attempt >= policy.max_attempts => {
                tracing::error!(attempt, error = %err, "Operation failed after max attempts");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.sleep_duration(attempt - 1);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Rerun a command while it fails with [`ConsistencyError::OptimisticConflict`].
///
/// Every retry increments `eventloom_command_retries_total`. Any other error
/// is returned immediately.
///
/// # Errors
///
/// The command's error; a conflict only after `policy.max_attempts` calls.
pub async fn retry_on_conflict<F, Fut, T>(policy: &RetryPolicy, mut command: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut calls = 0_usize;
    retry_with_predicate(
        policy,
        || {
            calls += 1;
            if calls > 1 {
                metrics::counter!("eventloom_command_retries_total").increment(1);
            }
            command()
        },
        |err| matches!(err, ConsistencyError::OptimisticConflict { .. }),
    )
    .await
}
