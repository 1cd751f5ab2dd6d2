//! Shared retry utilities for remote calls.
//!
//! Transport failures and server errors are retried with bounded exponential
//! backoff before an error reaches the caller.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};

/// Default initial backoff in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 250;

/// Default maximum backoff in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Default number of retries after the first attempt.
pub const MAX_RETRIES: usize = 4;

/// Configuration for retry operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: MAX_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Build the default exponential backoff strategy.
#[must_use]
pub fn default_backoff() -> ExponentialBuilder {
    RetryConfig::default().into_backoff()
}

/// Delay before the `attempt`-th delivery of a queued message.
///
/// Follows the exponential schedule of `config` without its retry cap;
/// attempts past the end of the schedule wait `max_delay`.
#[must_use]
pub fn redelivery_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let schedule = RetryConfig {
        max_retries: usize::MAX,
        ..config.clone()
    };
    schedule
        .into_backoff()
        .build()
        .nth(attempt.saturating_sub(2) as usize)
        .unwrap_or(config.max_delay)
}

/// Execute an operation, retrying errors for which `is_retryable` holds.
///
/// Non-retryable errors are returned on first occurrence. Each retry is
/// logged at debug level together with `context` (usually the request URL).
pub async fn with_retry<T, E, F, Fut, IsRetryable>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: IsRetryable,
    context: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    IsRetryable: Fn(&E) -> bool,
{
    let attempt = AtomicU32::new(0);

    let retry_op = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    retry_op
        .retry(config.clone().into_backoff())
        .when(|e| is_retryable(e))
        .notify(|err, dur| {
            tracing::debug!(
                context,
                attempt = attempt.load(Ordering::SeqCst),
                delay_ms = dur.as_millis() as u64,
                "Retrying after transient error: {}",
                err
            );
        })
        .await
}
