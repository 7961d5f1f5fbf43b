//! Transport-level retries inside a single request attempt.
//!
//! A request may ask for a number of transport retries (see
//! [`Request::with_retries`](dispatch_core::request::Request::with_retries)).
//! They happen while the request is `Running` and are invisible to
//! subscribers. This is unrelated to the user-driven retry of the image
//! loader, which starts a whole new attempt.
//!
//! # Example
//!
//! ```rust
//! use dispatch_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .initial_delay(Duration::from_millis(10))
//!     .build();
//!
//! let value = retry_with_predicate(
//!     policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("transient"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use dispatch_core::request::Request;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration.
///
/// # Default Values
///
/// - `max_retries`: 0
/// - `initial_delay`: 500ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 1.0 (fixed interval)
/// - `jitter`: false
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first try
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap for the computed delay
    pub max_delay: Duration,
    /// Growth factor applied per retry
    pub multiplier: f64,
    /// Scale each delay by a random factor in `0.5..=1.0`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: false,
        }
    }

    /// Policy described by a request's retry count and interval.
    #[must_use]
    pub fn for_request(request: &Request) -> Self {
        Self {
            max_retries: request.retries(),
            initial_delay: request.retry_interval(),
            ..Self::default()
        }
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `min(initial_delay * multiplier^attempt, max_delay)`, scaled by a random
    /// factor in `0.5..=1.0` when jitter is enabled.
    // Note: Precision loss acceptable for delay calculation
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let mut delay_ms = (self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt as i32))
        .min(self.max_delay.as_millis() as f64);

        if self.jitter {
            delay_ms *= rand::thread_rng().gen_range(0.5..=1.0);
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: bool,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter,
        }
    }
}

/// Retry an async operation while `is_retryable` accepts its error.
///
/// Returns the first success, the first non-retryable error, or the last
/// error once `policy.max_retries` retries are used up.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Transport succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::debug!(error = %err, "Error is not retryable");
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    if policy.max_retries > 0 {
                        tracing::warn!(attempt, error = %err, "Transport failed after max retries");
                    }
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Transport failed, retrying"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fixed_interval_by_default() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(100));
    }

    #[test]
    fn exponential_growth_is_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(200))
            .jitter(true)
            .build();

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn request_retry_settings_become_policy() {
        let request = Request::get("http://x/").with_retries(4, Duration::from_millis(25));
        let policy = RetryPolicy::for_request(&request);
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.initial_delay, Duration::from_millis(25));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(5))
            .build();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry_with_predicate(
            policy,
            || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(format!("transient {n}")) } else { Ok(n) }
                }
            },
            |_: &String| true,
        )
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let policy = RetryPolicy::builder().max_retries(5).build();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry_with_predicate(
            policy,
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("permanent")
                }
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry_with_predicate(
            policy,
            || {
                let calls = Arc::clone(&calls);
                async move { Err::<(), _>(format!("try {}", calls.fetch_add(1, Ordering::SeqCst))) }
            },
            |_: &String| true,
        )
        .await;

        assert_eq!(result, Err("try 2".to_string()));
    }
}
