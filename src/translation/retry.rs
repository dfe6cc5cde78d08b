/*!
 * Reusable retry policy with exponential backoff and jitter.
 *
 * The policy does not know which errors are worth retrying; callers pass a
 * classifier so the same loop serves every error taxonomy.
 */

use log::{debug, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::app_config::PipelineConfig;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (2.0 doubles the delay each time)
    pub backoff_multiplier: f64,
    /// Extra random delay as a fraction of the computed delay, in [0, 1]
    pub jitter: f64,
}

/// Result of a retried operation and how many attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.retry_count, Duration::from_millis(config.retry_backoff_ms))
            .with_max_delay(Duration::from_millis(config.retry_max_backoff_ms))
            .with_jitter(config.retry_jitter)
    }

    /// Attempts actually made; a zero setting still allows one
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before the given attempt (0-indexed), without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms = self.base_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }

    /// Delay before the given attempt with jitter applied.
    ///
    /// The random extra stays below `jitter` times the attempt's own delay,
    /// so with a multiplier of 2 consecutive delays still strictly grow
    /// until the cap is reached.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if delay.is_zero() || self.jitter <= 0.0 {
            return delay;
        }

        let factor = rand::rng().random_range(0.0..self.jitter);
        delay + delay.mul_f64(factor)
    }

    /// Planned delays between attempts, without jitter
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.effective_attempts())
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }

    /// Run an operation until it succeeds, fails with a non-retryable
    /// error, or runs out of attempts.
    ///
    /// The operation receives the 1-based attempt number. The last error is
    /// returned when every attempt failed.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        operation_name: &str,
        mut operation: F,
        is_retryable: C,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.effective_attempts();
        let mut attempt = 0;

        loop {
            let delay = self.jittered_delay(attempt);
            if !delay.is_zero() {
                debug!(
                    "{}: Retry attempt {}/{} after {:?}",
                    operation_name,
                    attempt + 1,
                    max_attempts,
                    delay
                );
                sleep(delay).await;
            }

            let result = operation(attempt + 1).await;
            attempt += 1;

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{}: Succeeded on attempt {}/{}", operation_name, attempt, max_attempts);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    if !is_retryable(&error) {
                        debug!("{}: Not retrying: {}", operation_name, error);
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt,
                        };
                    }
                    if attempt >= max_attempts {
                        warn!(
                            "{}: Giving up after {} attempts: {}",
                            operation_name, attempt, error
                        );
                        return RetryOutcome {
                            result: Err(error),
                            attempts: attempt,
                        };
                    }
                    warn!(
                        "{}: Attempt {}/{} failed: {}",
                        operation_name, attempt, max_attempts, error
                    );
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}
