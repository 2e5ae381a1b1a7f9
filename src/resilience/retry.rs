//! Retry with exponential backoff and jitter.

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::error::{ErrorKind, TransientError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a uniform factor in [0.5, 1.0].
    pub jitter: bool,
    /// Kinds worth retrying; everything else propagates immediately.
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
            retry_on: ErrorKind::RETRYABLE_DEFAULT.to_vec(),
        }
    }
}

impl RetryPolicy {
    fn retries(&self, kind: ErrorKind) -> bool {
        self.retry_on.contains(&kind)
    }

    /// Backoff before attempt `attempt + 1`, where `attempt` counts from 1.
    fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let raw = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent as i32);
        let capped = raw.min(self.max_delay.as_millis() as f64);
        let scaled = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped
        };
        Duration::from_millis(scaled as u64)
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("`{operation}` failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: TransientError,
    },
    #[error(transparent)]
    Fatal(TransientError),
}

impl RetryError {
    /// The underlying failure, for callers (the breaker) that classify by kind.
    pub fn into_transient(self) -> TransientError {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Fatal(source) => source,
        }
    }
}

#[derive(Debug, Default)]
struct OperationStats {
    total_attempts: u64,
    successful_calls: u64,
    failed_calls: u64,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryStatsSnapshot {
    pub operation: String,
    pub total_attempts: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub average_attempts: f64,
    pub last_error: Option<String>,
}

/// Drives retryable operations and accumulates per-operation statistics.
/// Owns its own stats map; create once and share by handle.
#[derive(Default)]
pub struct RetryExecutor {
    stats: DashMap<String, OperationStats>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op` until it succeeds, a non-retryable error surfaces, or the
    /// policy's attempt budget is spent.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransientError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            metrics::counter!("voltgate_retry_attempt_total", "operation" => operation.to_string())
                .increment(1);
            match op().await {
                Ok(value) => {
                    self.record(operation, attempt, true, None);
                    return Ok(value);
                }
                Err(error) if !policy.retries(error.kind()) => {
                    self.record(operation, attempt, false, Some(&error));
                    return Err(RetryError::Fatal(error));
                }
                Err(error) if attempt >= max_attempts => {
                    self.record(operation, attempt, false, Some(&error));
                    warn!(
                        target = "voltgate::resilience",
                        operation,
                        attempts = attempt,
                        error = %error,
                        "retry budget exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: error,
                    });
                }
                Err(error) => {
                    let delay = policy.delay_after(attempt);
                    debug!(
                        target = "voltgate::resilience",
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn record(&self, operation: &str, attempts: u32, success: bool, error: Option<&TransientError>) {
        let mut stats = self.stats.entry(operation.to_string()).or_default();
        stats.total_attempts += u64::from(attempts);
        if success {
            stats.successful_calls += 1;
        } else {
            stats.failed_calls += 1;
        }
        if let Some(error) = error {
            stats.last_error = Some(error.to_string());
        }
    }

    pub fn snapshots(&self) -> Vec<RetryStatsSnapshot> {
        let mut snapshots: Vec<RetryStatsSnapshot> = self
            .stats
            .iter()
            .map(|entry| {
                let stats = entry.value();
                let calls = stats.successful_calls + stats.failed_calls;
                RetryStatsSnapshot {
                    operation: entry.key().clone(),
                    total_attempts: stats.total_attempts,
                    successful_calls: stats.successful_calls,
                    failed_calls: stats.failed_calls,
                    average_attempts: if calls == 0 {
                        0.0
                    } else {
                        stats.total_attempts as f64 / calls as f64
                    },
                    last_error: stats.last_error.clone(),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.operation.cmp(&b.operation));
        snapshots
    }
}
