//! Retry logic for USB transactions.
//!
//! Station reads fail transiently when the console is busy receiving
//! sensor data or writing its log. [`with_retry`] re-runs an operation
//! against mutable link state so every attempt can apply lockup-avoidance
//! pacing before touching the bus.
//!
//! # Example
//!
//! ```
//! use wslog_core::{RetryConfig, with_retry, Error};
//! use futures::FutureExt;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::new(3);
//! let mut attempts = 0u32;
//!
//! let value = with_retry(&config, "example", &mut attempts, |attempts| {
//!     async move {
//!         *attempts += 1;
//!         Ok::<_, Error>(42)
//!     }
//!     .boxed()
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// How often and how patiently a failed USB transaction is repeated.
///
/// The pause before retry `n` is `pause * 2^n`, capped at `max_pause`,
/// plus up to a quarter again when `jitter` is set.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Pause before the first retry.
    pub pause: Duration,
    /// Longest pause between attempts.
    pub max_pause: Duration,
    /// Add up to a quarter again to each pause.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryConfig {
    /// Read retries, starting half a second apart.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            pause: Duration::from_millis(500),
            max_pause: Duration::from_secs(10),
            jitter: true,
        }
    }

    /// Write retries. The console takes seconds to commit a fixed-block
    /// write, so attempts are spaced further apart.
    pub fn for_write() -> Self {
        Self {
            max_retries: 2,
            pause: Duration::from_secs(2),
            max_pause: Duration::from_secs(10),
            jitter: false,
        }
    }

    /// Set the pause before the first retry.
    #[must_use]
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Set the longest pause.
    #[must_use]
    pub fn max_pause(mut self, pause: Duration) -> Self {
        self.max_pause = pause;
        self
    }

    /// Enable or disable the random extra on each pause.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    pub(crate) fn pause_before(&self, retry: u32) -> Duration {
        let doubled = self.pause.saturating_mul(1 << retry.min(16));
        let pause = doubled.min(self.max_pause);
        if self.jitter {
            pause.mul_f64(1.0 + rand::rng().random_range(0.0_f64..0.25))
        } else {
            pause
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of retries.
///
/// The operation receives `state` mutably on every attempt. Errors that
/// are not [retryable](Error::is_retryable) are returned immediately;
/// once `config.max_retries` retries are spent the last error is wrapped
/// in [`Error::DeviceUnavailable`].
pub async fn with_retry<S, T, F>(
    config: &RetryConfig,
    operation_name: &'static str,
    state: &mut S,
    mut operation: F,
) -> Result<T>
where
    F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation(&mut *state).await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} recovered after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= config.max_retries => {
                error!(
                    "Device unavailable: {} failed after {} attempts: {}",
                    operation_name,
                    attempt + 1,
                    e
                );
                return Err(Error::DeviceUnavailable {
                    operation: operation_name,
                    attempts: attempt + 1,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                let delay = config.pause_before(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
