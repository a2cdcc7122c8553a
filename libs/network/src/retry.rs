//! Declarative retry with capped exponential backoff
//!
//! Used at the two transient-I/O boundaries only: accepting connections and
//! sending outbound commands. Everything else fails fast.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use torq_config::RetryConfig;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    /// Fraction of the delay added as random jitter
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, jitter: 0.0 }
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Total attempts including the first, never zero
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.calculate_delay(attempt);
        if self.jitter <= 0.0 || base == 0 {
            return Duration::from_millis(base);
        }
        let spread = (base as f64 * self.jitter) as u64;
        let extra = rand::thread_rng().gen_range(0..=spread);
        Duration::from_millis(base.saturating_add(extra))
    }

    /// Run `op` until it succeeds or attempts are exhausted
    ///
    /// `op` receives the 0-based attempt number. The last error is returned
    /// unchanged when every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts();
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation,
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("{} failed after {} attempts: {}", operation, attempts, e);
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 4,
            use_exponential_backoff: true,
        })
    }

    #[test]
    fn test_delay_schedule_is_capped() {
        let policy = fast(5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4));
        assert_eq!(policy.delay_for(8), Duration::from_millis(4));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = RetryPolicy::new(RetryConfig::new(3, 100)).with_jitter(0.5);
        for _ in 0..50 {
            let delay = policy.delay_for(0).as_millis();
            assert!((100..=150).contains(&delay));
        }
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, String> = fast(5)
            .run("flaky", |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(format!("attempt {} failed", attempt))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_returns_last_error() {
        let result: Result<(), String> = fast(3)
            .run("always", |attempt| async move { Err(format!("boom {}", attempt)) })
            .await;
        assert_eq!(result, Err("boom 2".to_string()));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let result: Result<u8, String> = fast(0).run("once", |_| async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
