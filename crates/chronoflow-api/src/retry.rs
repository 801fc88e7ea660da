//! Bounded retry with exponential backoff and jitter.
//!
//! Backoff blocks only the task running the attempt; sibling actions in
//! a batch are unaffected. A `Retry-After` from the server overrides the
//! computed backoff, capped so a hostile header cannot stall a worker.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use chronoflow_core::config::RetryConfig;
use chronoflow_core::Result;

#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts are
    /// exhausted. Only errors classified retryable (429, 5xx, transport)
    /// are retried; everything else returns after the first attempt.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.compute_delay(attempt, err.retry_after_ms());
                    tracing::warn!(
                        "⚠️ {label} attempt {attempt}/{max_attempts} failed ({err}), retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Delay before the attempt following `attempt` (1-based). A server
    /// Retry-After wins over the computed backoff, capped; otherwise the
    /// base delay doubles per attempt up to the cap, plus jitter.
    pub fn compute_delay(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        if let Some(ra) = retry_after_ms {
            return Duration::from_millis(ra.min(self.config.retry_after_cap_ms));
        }
        let exp = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(32))
            .min(self.config.max_delay_ms);
        let jitter = if self.config.jitter_max_ms > self.config.jitter_min_ms {
            rand::thread_rng().gen_range(self.config.jitter_min_ms..=self.config.jitter_max_ms)
        } else {
            self.config.jitter_min_ms
        };
        Duration::from_millis(exp + jitter)
    }
}
