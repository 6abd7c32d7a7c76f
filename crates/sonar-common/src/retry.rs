//! Retry utilities with exponential backoff and jitter.
//!
//! Remote configuration store calls go through [`retry_cancellable`], which
//! gives up early on non-retryable errors and stops as soon as the agent's
//! shutdown token fires.
//!
//! # Example
//!
//! ```ignore
//! use sonar_common::retry::{retry_cancellable, RetryConfig};
//!
//! retry_cancellable(
//!     &RetryConfig::with_max_attempts(5),
//!     "configure_services",
//!     &shutdown,
//!     || async { store.configure_services("alpha", &config).await },
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::Error;

/// Backoff settings for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Create a config that retries forever (infinite attempts)
    pub fn infinite() -> Self {
        Self::default()
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Add jitter: 0.5x to 1.5x of the delay
fn jittered(delay: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
}

/// Execute an async operation with backoff, bounded by a cancellation token.
///
/// Stops immediately on errors that
/// report `!is_retryable()`, and returns [`Error::Cancelled`] if `token`
/// fires while an attempt is in flight or while waiting between attempts.
/// An in-flight attempt is dropped on cancellation.
pub async fn retry_cancellable<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::cancelled(operation_name)),
            outcome = operation() => outcome,
        };

        let e = match outcome {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !e.is_retryable() {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %e,
                "Operation failed with non-retryable error"
            );
            return Err(e);
        }
        if config.exhausted(attempt) {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %e,
                "Operation failed after max retries"
            );
            return Err(e);
        }

        let jittered_delay = jittered(delay);
        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %e,
            delay_ms = jittered_delay.as_millis(),
            "Operation failed, retrying"
        );

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::cancelled(operation_name)),
            _ = tokio::time::sleep(jittered_delay) => {}
        }
        delay = config.next_delay(delay);
    }
}
