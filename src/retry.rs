//! Retry logic with exponential backoff
//!
//! Segment attempts are retried in place when the caller raises
//! [`RetryConfig::max_attempts`] above its default of zero. Backoff is
//! exponential with optional jitter to prevent thundering herd.
//!
//! # Example
//!
//! ```no_run
//! use hls_dl::retry::{IsRetryable, download_with_retry};
//! use hls_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig { max_attempts: 3, ..RetryConfig::default() };
//! let result = download_with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, SegmentFetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, refused connections, overloaded origins) should return `true`.
/// Permanent failures (missing segments, storage errors) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for SegmentFetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // Request timeout, rate limiting and server-side failures are transient
            SegmentFetchError::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            SegmentFetchError::Transport { source, .. } => source.is_retryable(),
            // A local storage failure will not be fixed by refetching
            SegmentFetchError::Store { .. } => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Fatal task errors, storage and configuration problems are permanent
            Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Manifest(_)
            | Error::Download(_)
            | Error::Delivery(_)
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `operation` - Async closure that returns Result<T, E> where E implements IsRetryable
///
/// # Returns
///
/// Returns the successful result or the last error after all retry attempts are exhausted.
///
/// # Example
///
/// ```no_run
/// use hls_dl::retry::download_with_retry;
/// use hls_dl::config::RetryConfig;
/// use hls_dl::error::Error;
///
/// # async fn example() -> Result<(), Error> {
/// let config = RetryConfig::default();
/// let result = download_with_retry(&config, || async {
///     // Simulate a network operation that might fail
///     Ok::<String, Error>("success".to_string())
/// }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        let error = match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= config.max_attempts {
            if attempt > 0 {
                tracing::warn!(
                    error = %error,
                    attempts = attempt + 1,
                    "Operation failed after all retry attempts exhausted"
                );
            }
            return Err(error);
        }

        attempt += 1;
        let wait = if config.jitter {
            add_jitter(delay)
        } else {
            delay
        };

        tracing::debug!(
            error = %error,
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = wait.as_millis() as u64,
            "Operation failed, retrying"
        );

        tokio::time::sleep(wait).await;
        delay = next_delay(delay, config);
    }
}

/// Grow `delay` by the backoff multiplier, capped at `max_delay`
///
/// Products that do not fit in a [`Duration`] (an infinite multiplier, or a
/// large one applied repeatedly) saturate to `max_delay`.
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
///
/// # Arguments
///
/// * `delay` - Base delay duration
///
/// # Returns
///
/// Jittered delay duration
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(delay)
}
