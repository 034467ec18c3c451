//! Bounded Retry with Exponential Backoff
//!
//! Retries transient backend faults at the stage-invocation boundary.
//! Rejections (bad credentials, malformed config) and shape mismatches are
//! never retried — resending the same request will not fix them.
//!
//! # Strategy
//!
//! - Delay doubles each attempt: base_delay * 2^attempt, capped at max_delay
//! - Jitter spreads retries: delay * (1 + pseudo_random(0, jitter_factor))
//! - Attempts are capped (default 3 total, i.e. 2 retries)

use super::BackendError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum total attempts (1 = no retries)
    pub max_attempts: usize,
    /// Initial delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Random jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with custom values
    pub fn new(
        max_attempts: usize,
        base_delay: Duration,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Disable retries entirely
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Calculate the delay before retry number `attempt` (0-indexed)
    ///
    /// Exponential backoff capped at max_delay, with deterministic jitter
    /// derived from the attempt number.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let exp_delay = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt as u32);
        let capped = exp_delay.min(self.max_delay.as_millis() as u64);

        let jitter = if self.jitter_factor > 0.0 {
            let pseudo_random = ((attempt as f64 * 0.618033988749895) % 1.0) * self.jitter_factor;
            1.0 + pseudo_random
        } else {
            1.0
        };

        Duration::from_millis((capped as f64 * jitter) as u64)
    }
}

/// Execute a backend operation with bounded retry
///
/// Only retryable errors (transient faults, timeouts) are retried; the
/// first non-retryable error is surfaced immediately. Returns the last
/// error once attempts are exhausted.
///
/// # Example
///
/// ```rust,ignore
/// let output = invoke_with_retry(
///     || backend.invoke("execute", inputs.clone()),
///     &RetryConfig::default(),
/// ).await?;
/// ```
pub async fn invoke_with_retry<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }

                attempt += 1;
                if attempt >= config.max_attempts {
                    return Err(err);
                }

                let delay = config.calculate_delay(attempt - 1);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying backend call");
                sleep(delay).await;
            }
        }
    }
}
