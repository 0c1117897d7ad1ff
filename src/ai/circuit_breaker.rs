//! Per-provider circuit breaker

use crate::config::CircuitBreakerSettings;
use crate::error::RagError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,

    /// Circuit is open, requests are rejected
    Open,

    /// Circuit is half-open, trial requests test whether the provider recovered
    HalfOpen,
}

impl CircuitState {
    fn gauge(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,

    /// Time the circuit stays open before a trial is admitted
    pub recovery_timeout: Duration,

    /// Trial calls admitted concurrently while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            success_threshold: settings.success_threshold.max(1),
            recovery_timeout: Duration::from_secs(settings.recovery_timeout_secs),
            half_open_max_calls: settings.half_open_max_calls.max(1),
        }
    }
}

/// Point-in-time health of one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_transition: DateTime<Utc>,
    /// Milliseconds until an open circuit admits a trial call
    pub recovery_remaining_ms: Option<u64>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    last_transition: DateTime<Utc>,
    /// Bumped on every transition so permits issued earlier are ignored
    epoch: u64,
}

impl BreakerInner {
    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.epoch += 1;
        self.last_transition = Utc::now();
        self.half_open_in_flight = 0;
        self.consecutive_successes = 0;
        match to {
            CircuitState::Open => self.opened_at = Some(Instant::now()),
            CircuitState::Closed => {
                self.opened_at = None;
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn remaining(&self, timeout: Duration) -> Duration {
        self.opened_at
            .map(|at| timeout.saturating_sub(at.elapsed()))
            .unwrap_or_default()
    }
}

/// Circuit breaker protecting a single provider
///
/// Cloning yields another handle to the same breaker. All state transitions
/// happen under one mutex that is never held across an await point.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    total_calls: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                opened_at: None,
                last_transition: Utc::now(),
                epoch: 0,
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask for permission to call the provider
    pub fn try_acquire(&self) -> Result<CallPermit, RagError> {
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let remaining = inner.remaining(self.config.recovery_timeout);
            if remaining.is_zero() {
                inner.transition(CircuitState::HalfOpen);
                debug!(provider = %self.name, "Circuit breaker transitioning to half-open state");
            } else {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(RagError::CircuitOpen {
                    provider: self.name.to_string(),
                    remaining,
                });
            }
        }

        let trial = inner.state == CircuitState::HalfOpen;
        if trial {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(RagError::CircuitOpen {
                    provider: self.name.to_string(),
                    remaining: Duration::ZERO,
                });
            }
            inner.half_open_in_flight += 1;
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        Ok(CallPermit {
            breaker: self.clone(),
            trial,
            epoch: inner.epoch,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }

        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                if trial {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.transition(CircuitState::Closed);
                    warn!(provider = %self.name, "Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, trial: bool, epoch: u64) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let failures = inner.consecutive_failures;
                    inner.transition(CircuitState::Open);
                    warn!(provider = %self.name, failures, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                if trial {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
                inner.consecutive_failures += 1;
                inner.transition(CircuitState::Open);
                warn!(provider = %self.name, "Circuit breaker reopened after failure in half-open state");
            }
            CircuitState::Open => {}
        }
    }

    fn on_cancel(&self, trial: bool, epoch: u64) {
        if !trial {
            return;
        }
        let mut inner = self.lock();
        if inner.epoch == epoch && inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Close the circuit after an out-of-band health probe succeeded
    pub fn close_after_probe(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            inner.transition(CircuitState::Closed);
            warn!(provider = %self.name, "Circuit breaker closed after successful health probe");
        }
    }

    /// Get current state, applying the open-to-half-open timeout lazily
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        if inner.state == CircuitState::Open && inner.remaining(self.config.recovery_timeout).is_zero() {
            CircuitState::HalfOpen
        } else {
            inner.state
        }
    }

    /// Snapshot for health reporting
    pub fn snapshot(&self) -> ProviderHealth {
        let inner = self.lock();
        let recovery_remaining_ms = (inner.state == CircuitState::Open)
            .then(|| inner.remaining(self.config.recovery_timeout).as_millis() as u64);

        ProviderHealth {
            provider: self.name.to_string(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_transition: inner.last_transition,
            recovery_remaining_ms,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Export breaker state as Prometheus samples labelled by provider
    pub fn export_prometheus(&self) -> String {
        let health = self.snapshot();
        format!(
            "provider_circuit_state{{provider=\"{name}\"}} {}\n\
             provider_calls_total{{provider=\"{name}\"}} {}\n\
             provider_failures_total{{provider=\"{name}\"}} {}\n\
             provider_rejected_total{{provider=\"{name}\"}} {}\n",
            health.state.gauge(),
            health.total_calls,
            health.total_failures,
            health.rejected_calls,
            name = self.name,
        )
    }

    /// Reset circuit breaker to closed
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.transition(CircuitState::Closed);
        debug!(provider = %self.name, "Circuit breaker reset");
    }
}

/// Permission to make one logical call through a breaker
///
/// Exactly one outcome is recorded. Dropping the permit without an outcome
/// releases its half-open slot and leaves the counters untouched.
#[derive(Debug)]
pub struct CallPermit {
    breaker: CircuitBreaker,
    trial: bool,
    epoch: u64,
    settled: bool,
}

impl CallPermit {
    pub fn provider(&self) -> &str {
        self.breaker.name()
    }

    /// Record a successful call
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial, self.epoch);
    }

    /// Record a failed call
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial, self.epoch);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_cancel(self.trial, self.epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, successes: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: failures,
                success_threshold: successes,
                recovery_timeout: timeout,
                half_open_max_calls: 1,
            },
        )
    }

    fn fail_times(cb: &CircuitBreaker, n: u32) {
        for _ in 0..n {
            cb.try_acquire().unwrap().failure();
        }
    }

    #[test]
    fn test_circuit_breaker_closed() {
        let cb = breaker(3, 2, Duration::from_secs(1));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn test_circuit_breaker_opens_after_threshold() {
        let cb = breaker(3, 2, Duration::from_secs(60));
        fail_times(&cb, 2);
        assert_eq!(cb.state(), CircuitState::Closed);

        fail_times(&cb, 1);
        assert_eq!(cb.state(), CircuitState::Open);

        match cb.try_acquire() {
            Err(RagError::CircuitOpen { provider, remaining }) => {
                assert_eq!(provider, "test");
                assert!(remaining > Duration::from_secs(50));
            }
            other => panic!("expected CircuitOpen, got {:?}", other.map(|_| ())),
        }
        assert_eq!(cb.snapshot().rejected_calls, 1);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let cb = breaker(3, 2, Duration::from_secs(60));
        fail_times(&cb, 2);
        cb.try_acquire().unwrap().success();
        fail_times(&cb, 2);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_admits_single_trial() {
        let cb = breaker(2, 2, Duration::from_millis(50));
        fail_times(&cb, 2);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let trial = cb.try_acquire().unwrap();
        assert!(matches!(cb.try_acquire(), Err(RagError::CircuitOpen { .. })));

        trial.success();
        assert_eq!(cb.snapshot().consecutive_successes, 1);
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_circuit_breaker_recovery() {
        let cb = breaker(2, 2, Duration::from_millis(50));
        fail_times(&cb, 2);
        tokio::time::sleep(Duration::from_millis(80)).await;

        cb.try_acquire().unwrap().success();
        cb.try_acquire().unwrap().success();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(2, 2, Duration::from_millis(50));
        fail_times(&cb, 2);
        tokio::time::sleep(Duration::from_millis(80)).await;

        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.snapshot().state, CircuitState::Open);
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test]
    async fn test_dropped_permit_releases_trial_slot() {
        let cb = breaker(1, 1, Duration::from_millis(50));
        fail_times(&cb, 1);
        tokio::time::sleep(Duration::from_millis(80)).await;

        let permit = cb.try_acquire().unwrap();
        drop(permit);

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::HalfOpen);
        assert_eq!(snapshot.consecutive_successes, 0);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn test_stale_permit_is_ignored() {
        let cb = breaker(1, 1, Duration::from_secs(60));
        let stale = cb.try_acquire().unwrap();
        fail_times(&cb, 1);
        cb.reset();

        stale.failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset_and_probe_close() {
        let cb = breaker(1, 3, Duration::from_secs(60));
        fail_times(&cb, 1);
        cb.close_after_probe();
        assert_eq!(cb.state(), CircuitState::Closed);

        fail_times(&cb, 1);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.export_prometheus().contains("provider_circuit_state{provider=\"test\"} 0"));
    }
}
