//! Retry with exponential backoff for fetch operations.

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff};
use metacrawl_core::AppConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::FetchError;

/// Errors that know whether another attempt could succeed.
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        FetchError::is_retryable(self)
    }
}

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.retry_delay(),
            max_delay: config.max_retry_delay(),
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_max_interval(self.max_delay.max(self.initial_delay))
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Run `f` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. The last error is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut backoff = policy.backoff();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        match f().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation, attempts, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_retryable() {
                    debug!(operation, error = %err, "not retryable, failing immediately");
                    return Err(err);
                }

                if attempts > policy.max_retries {
                    warn!(operation, attempts, error = %err, "giving up after maximum retries");
                    return Err(err);
                }

                let Some(delay) = backoff.next_backoff() else {
                    return Err(err);
                };
                warn!(
                    operation,
                    attempt = attempts,
                    max_retries = policy.max_retries,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
