//! Retry logic with backoff for handling transient failures and slow effects.
//!
//! Two flavours live here:
//!
//! - [`retry_with_backoff`] / [`retry_with_predicate`] retry a **fallible**
//!   operation (`Result`) with exponential backoff. The outbound publisher uses
//!   them for broker round trips.
//! - [`retry_until`] re-evaluates a **condition** (`bool`) until it holds or the
//!   attempt budget is spent. Callers use it to wait for asynchronous effects,
//!   typically wrapping a completion-tracker wait that itself has a timeout.
//!
//! # Example
//!
//! ```rust
//! use booking_pipeline_runtime::retry::{RetryOutcome, WaitPolicy, retry_until};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let policy = WaitPolicy::linear(3, Duration::from_millis(10));
//!
//! let outcome = retry_until(&policy, "publishing", || async { true }).await;
//! assert_eq!(outcome, RetryOutcome::Succeeded { attempts: 1 });
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: false
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Scale each delay by a random factor in `0.5..=1.0`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: Some(3),
            initial_delay: Some(Duration::from_millis(100)),
            max_delay: Some(Duration::from_secs(30)),
            multiplier: Some(2.0),
            jitter: Some(false),
        }
    }

    /// Total number of attempts allowed (initial try plus retries).
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: delay = `initial_delay` * (multiplier ^ attempt)
    /// Capped at `max_delay`, then scaled by jitter when enabled.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let exponent = attempt.min(i32::MAX as usize) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());

        if self.jitter {
            use rand::Rng;
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            saturating_secs(capped_secs * factor)
        } else {
            saturating_secs(capped_secs)
        }
    }
}

/// `secs` as a [`Duration`], saturating at `Duration::MAX` and clamping
/// negative or NaN values to zero.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .unwrap_or(if secs > 0.0 { Duration::MAX } else { Duration::ZERO })
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<bool>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
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
            max_retries: self.max_retries.unwrap_or(3),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(100)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(30)),
            multiplier: self.multiplier.unwrap_or(2.0),
            jitter: self.jitter.unwrap_or(false),
        }
    }
}

/// Failure of a retried operation: the last error and how many attempts ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    /// Error returned by the final attempt
    pub last_error: E,
    /// Number of attempts made
    pub attempts: usize,
}

/// Retry an async operation with exponential backoff.
///
/// # Returns
///
/// Returns `Ok(T)` if the operation succeeds within the retry limit, or a
/// [`RetryError`] carrying the final error and the attempt count.
///
/// # Errors
///
/// Returns [`RetryError`] once `policy.max_retries` retries have failed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation, |_| true).await
}

/// Retry an async operation with custom retry logic.
///
/// Errors for which `is_retryable` returns `false` fail immediately.
///
/// # Errors
///
/// Returns [`RetryError`] on a non-retryable error or once retries are exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(error = %err, "Error is not retryable, failing immediately");
                    return Err(RetryError {
                        last_error: err,
                        attempts: attempt + 1,
                    });
                }

                if attempt >= policy.max_retries {
                    tracing::error!(attempt, error = %err, "Operation failed after max retries");
                    return Err(RetryError {
                        last_error: err,
                        attempts: attempt + 1,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// How the pause between condition evaluations grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `attempt * base_delay` (2s, 4s, 6s, ... for a 2s base)
    Linear,
    /// `base_delay * multiplier^(attempt - 1)`
    Exponential {
        /// Growth factor per attempt
        multiplier: f64,
    },
}

/// Bounds for [`retry_until`].
#[derive(Debug, Clone, PartialEq)]
pub struct WaitPolicy {
    /// Maximum number of condition evaluations
    pub max_attempts: u32,
    /// Base pause between evaluations
    pub base_delay: Duration,
    /// Growth of the pause
    pub backoff: Backoff,
    /// Optional cap on total wall time, including time spent in the condition
    pub deadline: Option<Duration>,
}

impl WaitPolicy {
    /// Linear backoff with no overall deadline.
    #[must_use]
    pub const fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Linear,
            deadline: None,
        }
    }

    /// Exponential backoff with no overall deadline.
    #[must_use]
    pub const fn exponential(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential { multiplier },
            deadline: None,
        }
    }

    /// Cap the total wall time of the wait.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Pause after the failed evaluation number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential { multiplier } => {
                #[allow(clippy::cast_possible_wrap)]
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                saturating_secs(self.base_delay.as_secs_f64() * multiplier.powi(exponent))
            }
        }
    }

    /// Sum of all pauses if every evaluation fails (no trailing pause).
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.delay_after(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Result of [`retry_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The condition held on evaluation number `attempts`
    Succeeded {
        /// Evaluations made, including the successful one
        attempts: u32,
    },
    /// The condition never held within the budget
    Exhausted {
        /// Evaluations made
        attempts: u32,
    },
}

impl RetryOutcome {
    /// Whether the condition eventually held.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Number of evaluations made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts } | Self::Exhausted { attempts } => *attempts,
        }
    }
}

/// Evaluate `condition` until it returns `true` or the policy is exhausted.
///
/// Sleeps [`WaitPolicy::delay_after`] between evaluations, never after the
/// last one. A condition that returns `false` is never treated as an error;
/// only the final outcome is reported. Each attempt leaves a tracing
/// breadcrumb tagged with `operation`.
pub async fn retry_until<F, Fut>(
    policy: &WaitPolicy,
    operation: &str,
    mut condition: F,
) -> RetryOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let attempts = AtomicU32::new(0);
    let run = evaluate(policy, operation, &mut condition, &attempts);

    let outcome = match policy.deadline {
        Some(deadline) => match tokio::time::timeout(deadline, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let attempts = attempts.load(Ordering::SeqCst);
                tracing::error!(
                    operation,
                    attempts,
                    deadline_ms = deadline.as_millis(),
                    "{operation} did not settle before the deadline"
                );
                RetryOutcome::Exhausted { attempts }
            }
        },
        None => run.await,
    };

    if !outcome.is_success() {
        tracing::error!(
            operation,
            max_attempts = policy.max_attempts,
            "{operation} failed after {} attempts",
            outcome.attempts()
        );
    }
    outcome
}

async fn evaluate<F, Fut>(
    policy: &WaitPolicy,
    operation: &str,
    condition: &mut F,
    attempts: &AtomicU32,
) -> RetryOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=policy.max_attempts {
        tracing::info!(
            operation,
            attempt,
            max_attempts = policy.max_attempts,
            "Waiting for {operation}"
        );
        attempts.store(attempt, Ordering::SeqCst);

        if condition().await {
            tracing::info!(operation, attempt, "{operation} successful");
            return RetryOutcome::Succeeded { attempts: attempt };
        }

        if attempt < policy.max_attempts {
            let delay = policy.delay_after(attempt);
            tracing::warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis(),
                "{operation} not settled, retrying"
            );
            sleep(delay).await;
        }
    }

    RetryOutcome::Exhausted {
        attempts: attempts.load(Ordering::SeqCst),
    }
}
