//! Retry with exponential backoff and jitter

use quill_core::{ProviderError, QuillError, QuillResult, RetryConfig};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retries transient failures of an async operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Total attempts, the first call included.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Backoff before retry number `attempt` (0-based):
    /// `initial * factor^attempt * (1 ± jitter)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay.as_secs_f64()
            * self.config.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let jitter = self.config.jitter.abs();
        let spread = if jitter > 0.0 {
            rand::rng().random_range(-jitter..=jitter)
        } else {
            0.0
        };
        let secs = (base * (1.0 + spread)).clamp(0.0, self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. The last error is returned in the latter cases.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> QuillResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QuillResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.backoff_after(&e, attempt);
                    tracing::warn!(
                        operation = %label,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A provider's `retry-after` hint wins over a shorter computed backoff.
    fn backoff_after(&self, error: &QuillError, attempt: u32) -> Duration {
        let computed = self.delay_for(attempt);
        match error {
            QuillError::Provider(ProviderError::RateLimited { retry_after_ms, .. }) => {
                computed
                    .max(Duration::from_millis(*retry_after_ms))
                    .min(self.config.max_delay)
            }
            _ => computed,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_delay_within_jitter_bounds(
            attempt in 0u32..6,
            initial_ms in 1u64..500,
            factor in 1.0f64..3.0,
            jitter in 0.0f64..0.5,
        ) {
            let config = RetryConfig {
                max_retries: 6,
                initial_delay: Duration::from_millis(initial_ms),
                backoff_factor: factor,
                jitter,
                max_delay: Duration::from_secs(3_600),
            };
            let policy = RetryPolicy::new(config);
            let base = initial_ms as f64 / 1000.0 * factor.powi(attempt as i32);
            let delay = policy.delay_for(attempt).as_secs_f64();
            prop_assert!(delay >= base * (1.0 - jitter) - 1e-9);
            prop_assert!(delay <= base * (1.0 + jitter) + 1e-9);
        }

        #[test]
        fn prop_delay_never_exceeds_cap(attempt in 0u32..40, max_ms in 1u64..5_000) {
            let policy = RetryPolicy::new(RetryConfig {
                max_delay: Duration::from_millis(max_ms),
                ..RetryConfig::default()
            });
            prop_assert!(policy.delay_for(attempt) <= Duration::from_millis(max_ms));
        }
    }
}
