//! Retry-with-backoff combinator.
//!
//! The policy is independent of HTTP: [`with_retry`] takes any async
//! operation returning [`AppResult`] and retries it while the error is
//! transient.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::error::{AppError, AppResult};

/// Upper bound on a server-requested `Retry-After` delay.
const MAX_SERVER_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 means a single attempt).
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each following retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Scale each delay by a random factor in 0.8..=1.2.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Backoff before retry number `attempt + 1` (attempt is zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .as_secs_f64()
            * 2f64.powi(attempt.min(30) as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            capped * rand::rng().random_range(0.8..=1.2)
        } else {
            capped
        };

        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    fn delay_after(&self, attempt: u32, error: &AppError) -> Duration {
        let backoff = self.delay_for_attempt(attempt);
        match error {
            AppError::Transient {
                retry_after: Some(requested),
                ..
            } => backoff.max((*requested).min(MAX_SERVER_DELAY)),
            _ => backoff,
        }
    }
}

/// Run `operation` until it succeeds, fails non-transiently, or the policy's
/// retries are exhausted. Returns the last error in the latter cases.
///
/// # Errors
///
/// Returns the operation's error unchanged.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(operation = operation_name, retries = attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_after(attempt, &e);
                attempt += 1;
                tracing::warn!(
                    operation = operation_name,
                    error = %e,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(
                        operation = operation_name,
                        error = %e,
                        max_retries = policy.max_retries,
                        "Giving up after max retries"
                    );
                }
                return Err(e);
            }
        }
    }
}
