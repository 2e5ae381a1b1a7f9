//! Per-dependency circuit breaker.
//!
//! Each named dependency ("database", "cache-store", …) owns an independent
//! breaker, created lazily on first reference and cached by name for the
//! process lifetime. `execute` is the sole entry point: while OPEN it rejects
//! with [`BreakerError::Open`] without invoking the wrapped operation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::lock::mutex_lock;

use super::error::{ErrorKind, TransientError};

const SOURCE: &str = "resilience::breaker";

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive non-ignored failures that trip CLOSED → OPEN.
    pub failure_threshold: u32,
    /// How long OPEN rejects before admitting a HALF_OPEN trial.
    pub recovery_timeout: Duration,
    /// Failure kinds that pass through without counting toward the threshold.
    pub ignored: Vec<ErrorKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            ignored: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("circuit `{dependency}` is open; next attempt in {retry_in:?}")]
    Open {
        dependency: String,
        retry_in: Duration,
    },
    #[error(transparent)]
    Inner(TransientError),
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    trial_in_flight: bool,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
}

enum Admission {
    Admit { trial: bool },
    Reject { retry_in: Duration },
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                trial_in_flight: false,
                last_failure_at: None,
                last_success_at: None,
                next_attempt_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` under the breaker. Returns [`BreakerError::Open`] without
    /// invoking `op` while the circuit rejects, otherwise forwards the
    /// operation's own result and updates the state machine.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TransientError>>,
    {
        let trial = match self.admit() {
            Admission::Admit { trial } => trial,
            Admission::Reject { retry_in } => {
                metrics::counter!("voltgate_breaker_rejected_total", "dependency" => self.name.clone())
                    .increment(1);
                return Err(BreakerError::Open {
                    dependency: self.name.clone(),
                    retry_in,
                });
            }
        };

        match op().await {
            Ok(value) => {
                self.on_success(trial);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(error.kind(), trial);
                Err(BreakerError::Inner(error))
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        mutex_lock(&self.inner, SOURCE, "state").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = mutex_lock(&self.inner, SOURCE, "snapshot");
        let now = Instant::now();
        BreakerSnapshot {
            dependency: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            seconds_since_last_failure: inner
                .last_failure_at
                .map(|at| now.saturating_duration_since(at).as_secs()),
            seconds_since_last_success: inner
                .last_success_at
                .map(|at| now.saturating_duration_since(at).as_secs()),
            seconds_until_next_attempt: inner
                .next_attempt_at
                .map(|at| at.saturating_duration_since(now).as_secs()),
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = mutex_lock(&self.inner, SOURCE, "admit");
        match inner.state {
            BreakerState::Closed => Admission::Admit { trial: false },
            BreakerState::Open => {
                let now = Instant::now();
                match inner.next_attempt_at {
                    Some(at) if now < at => Admission::Reject {
                        retry_in: at.saturating_duration_since(now),
                    },
                    _ => {
                        inner.state = BreakerState::HalfOpen;
                        inner.trial_in_flight = true;
                        debug!(
                            target = "voltgate::resilience",
                            dependency = %self.name,
                            "breaker half-open, admitting trial request"
                        );
                        Admission::Admit { trial: true }
                    }
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Reject {
                        retry_in: Duration::ZERO,
                    }
                } else {
                    inner.trial_in_flight = true;
                    Admission::Admit { trial: true }
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "on_success");
        if trial {
            inner.trial_in_flight = false;
        }
        inner.success_count += 1;
        inner.last_success_at = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.next_attempt_at = None;
                debug!(
                    target = "voltgate::resilience",
                    dependency = %self.name,
                    "breaker closed after successful trial"
                );
            }
            BreakerState::Closed => {
                // Threshold counts consecutive failures only.
                inner.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self, kind: ErrorKind, trial: bool) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "on_failure");
        if trial {
            inner.trial_in_flight = false;
        }
        if self.config.ignored.contains(&kind) {
            return;
        }

        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            BreakerState::HalfOpen => self.open(&mut inner),
            BreakerState::Open => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.next_attempt_at = Some(Instant::now() + self.config.recovery_timeout);
        metrics::counter!("voltgate_breaker_open_total", "dependency" => self.name.clone())
            .increment(1);
        warn!(
            target = "voltgate::resilience",
            dependency = %self.name,
            failure_count = inner.failure_count,
            recovery_secs = self.config.recovery_timeout.as_secs(),
            "circuit breaker opened"
        );
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub seconds_since_last_failure: Option<u64>,
    pub seconds_since_last_success: Option<u64>,
    pub seconds_until_next_attempt: Option<u64>,
}

/// Creates breakers lazily by dependency name and keeps them for the process
/// lifetime. Injected wherever a breaker is needed; never a global.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, recovery_secs: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(recovery_secs),
            ignored: Vec::new(),
        }
    }

    #[tokio::test]
    async fn registry_reuses_breaker_by_name() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.breaker("database");
        let b = registry.breaker("database");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn ignored_kinds_do_not_trip_the_breaker() {
        let breaker = CircuitBreaker::new(
            "email",
            BreakerConfig {
                ignored: vec![ErrorKind::RateLimited],
                ..config(2, 30)
            },
        );

        for _ in 0..5 {
            let result: Result<(), _> = breaker
                .execute(|| async { Err(TransientError::RateLimited("slow down".into())) })
                .await;
            assert!(matches!(result, Err(BreakerError::Inner(_))));
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_trial() {
        let breaker = Arc::new(CircuitBreaker::new("database", config(1, 10)));

        let result: Result<(), _> = breaker
            .execute(|| async { Err(TransientError::Timeout("slow query".into())) })
            .await;
        assert!(matches!(result, Err(BreakerError::Inner(_))));
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;

        // First caller is admitted as the trial; a second concurrent caller
        // is rejected until the trial resolves.
        let gate = Arc::new(tokio::sync::Notify::new());
        let trial = {
            let breaker = breaker.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        gate.notified().await;
                        Ok::<_, TransientError>(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let concurrent: Result<(), _> = breaker.execute(|| async { Ok(()) }).await;
        assert!(matches!(concurrent, Err(BreakerError::Open { .. })));

        gate.notify_one();
        trial.await.expect("trial task").expect("trial succeeds");
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
