//! Circuit breaker for calls to unreliable dependencies.
//!
//! ```text
//! Closed ──(failures >= threshold)──► Open ──(recovery_timeout elapsed)──► HalfOpen
//!   ▲                                  ▲                                      │
//!   └──────────(trial succeeds)────────┼──────────────────────────────────────┤
//!                                      └────────────(trial fails)─────────────┘
//! ```
//!
//! While open, calls are rejected without running the operation. Half-open
//! admits exactly one trial call at a time.
//!
//! Each transition starts a new generation. An outcome only moves the state
//! machine if its call was admitted in the current generation; late results
//! from earlier generations are counted in the totals and otherwise ignored.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::BreakerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow through; consecutive failures are counted.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// One trial call decides between Closed and Open.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is allowed.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of a breaker, for logging and health reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
    generation: u64,
}

impl Inner {
    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.generation += 1;
    }
}

/// Three-state circuit breaker.
///
/// Shared between tasks behind an `Arc`; all state transitions happen under
/// one mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                trial_in_flight: false,
                generation: 0,
            }),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `operation` unless the breaker is open.
    ///
    /// Every error counts as a dependency failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(operation, |_| true).await
    }

    /// Like [`execute`](Self::execute), but only errors for which
    /// `is_failure` returns true count against the breaker. Other errors are
    /// returned as-is and treated as a healthy response from the dependency.
    pub async fn execute_classified<T, E, F, Fut, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let mut permit = self.acquire().ok_or_else(|| {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("circuit_breaker_rejections_total", "breaker" => self.name.clone())
                .increment(1);
            tracing::debug!(breaker = %self.name, "call rejected, circuit open");
            BreakerError::Open {
                name: self.name.clone(),
            }
        })?;

        let result = operation().await;
        let failed = match &result {
            Ok(_) => false,
            Err(e) => is_failure(e),
        };
        if failed {
            self.record_failure(&permit);
        } else {
            self.record_success(&permit);
        }
        permit.settled = true;

        result.map_err(BreakerError::Inner)
    }

    /// Current state. An open breaker whose recovery timeout has elapsed
    /// reports (and moves to) `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let (state, failure_count) = {
            let mut inner = self.inner.lock();
            self.maybe_half_open(&mut inner);
            (inner.state, inner.failures)
        };
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state,
            failure_count,
            failure_threshold: self.config.failure_threshold,
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Forces the breaker back to `Closed`.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.transition(CircuitState::Closed);
        inner.failures = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
        tracing::info!(breaker = %self.name, "circuit breaker manually reset");
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open
            && inner
                .last_failure
                .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout)
        {
            inner.transition(CircuitState::HalfOpen);
            inner.trial_in_flight = false;
            tracing::info!(breaker = %self.name, "circuit breaker half-open");
        }
    }

    fn acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);

        let generation = inner.generation;
        match inner.state {
            CircuitState::Closed => Some(Permit::new(self, generation, false)),
            CircuitState::Open => None,
            CircuitState::HalfOpen if inner.trial_in_flight => None,
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Some(Permit::new(self, generation, true))
            }
        }
    }

    fn record_success(&self, permit: &Permit<'_>) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        if inner.generation != permit.generation {
            return;
        }
        match inner.state {
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Closed);
                inner.failures = 0;
                inner.trial_in_flight = false;
                tracing::info!(breaker = %self.name, "circuit breaker closed after successful trial");
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, permit: &Permit<'_>) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        if inner.generation != permit.generation {
            return;
        }
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open);
                inner.trial_in_flight = false;
                tracing::warn!(breaker = %self.name, "circuit breaker re-opened after failed trial");
            }
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                inner.transition(CircuitState::Open);
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failures,
                    threshold = self.config.failure_threshold,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }
}

/// Admission to run one operation, tied to the generation it was issued in.
/// A half-open trial whose future is dropped before completing frees the
/// trial slot again.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, generation: u64, trial: bool) -> Self {
        Self {
            breaker,
            generation,
            trial,
            settled: false,
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            let mut inner = self.breaker.inner.lock();
            if inner.generation == self.generation {
                inner.trial_in_flight = false;
            }
        }
    }
}
