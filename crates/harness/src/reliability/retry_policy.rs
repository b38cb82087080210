//! Retry Policy Implementation
//!
//! Configurable retry loop with exponential backoff, shared by the health
//! probes (transport failures) and the recovery phase (scenario retries).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RetryError<E: Debug + Display> {
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("non-retryable failure: {0}")]
    Permanent(E),
}

impl<E: Debug + Display> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Permanent(e) => e,
        }
    }
}

/// Backoff strategies for retry delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed {
        delay_ms: u64,
    },

    /// `initial_delay * base^attempt`, capped at `max_delay`
    Exponential {
        initial_delay_ms: u64,
        base: f64,
        max_delay_ms: u64,
        #[serde(default)]
        jitter: bool,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_ms: 1000,
            base: 2.0,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

impl BackoffStrategy {
    /// `initial * 2^attempt` without jitter.
    pub fn doubling(initial: Duration) -> Self {
        Self::Exponential {
            initial_delay_ms: initial.as_millis() as u64,
            base: 2.0,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }

    /// Delay to sleep after the given failed attempt (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Self::Exponential {
                initial_delay_ms,
                base,
                max_delay_ms,
                jitter,
            } => {
                let raw = *initial_delay_ms as f64 * base.powf(attempt as f64);
                let capped = raw.min(*max_delay_ms as f64).max(0.0);
                let delay = Duration::from_millis(capped as u64);
                if *jitter {
                    add_jitter(delay)
                } else {
                    delay
                }
            }
        }
    }
}

/// ±25% random variation
fn add_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_retry_attempts: u64,
    pub max_retry_duration: Duration,
}

impl RetryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.successful_operations as f64 / self.total_operations as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    stats: RetryStats,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: RetryStats::default(),
        }
    }

    /// Runs `operation` until it succeeds, `is_retryable` rejects the error,
    /// or `max_attempts` is reached.
    pub async fn execute<F, Fut, T, E, P>(
        &mut self,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Debug + Display,
        P: Fn(&E) -> bool,
    {
        let start = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        self.stats.total_operations += 1;

        loop {
            debug!(attempt = attempt + 1, max_attempts, "executing with retry policy");

            match operation(attempt).await {
                Ok(value) => {
                    self.record_finish(attempt, start, true);
                    return Ok(value);
                }
                Err(error) if !is_retryable(&error) => {
                    warn!(error = %error, attempt = attempt + 1, "failure is not retryable");
                    self.record_finish(attempt, start, false);
                    return Err(RetryError::Permanent(error));
                }
                Err(error) => {
                    if attempt + 1 >= max_attempts {
                        warn!(error = %error, max_attempts, "maximum attempts exceeded");
                        self.record_finish(attempt, start, false);
                        return Err(RetryError::Exhausted {
                            attempts: attempt + 1,
                            last: error,
                        });
                    }

                    let delay = self.config.backoff.calculate_delay(attempt);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn record_finish(&mut self, retries: u32, start: Instant, success: bool) {
        if success {
            self.stats.successful_operations += 1;
        } else {
            self.stats.failed_operations += 1;
        }
        self.stats.total_retry_attempts += retries as u64;
        self.stats.max_retry_duration = self.stats.max_retry_duration.max(start.elapsed());
    }

    pub fn stats(&self) -> &RetryStats {
        &self.stats
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
