//! Fault tolerance (C10, §4.10): circuit breaker, jittered-backoff retry
//! policy, bulkhead, and graceful degradation. The circuit breaker's
//! sliding-window failure tracking is adapted from a synchronous
//! request-facing circuit breaker elsewhere in this stack's corpus, made
//! safe for concurrent pipeline executions by moving its mutable state
//! behind a `Mutex` and driving transitions from `record_*` rather than
//! from `allow_request` alone.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use buildit_config::{FaultToleranceConfig, RetryConfig};
use rand::Rng;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Circuit breaker states (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitInner {
    state: CircuitState,
    /// Failure timestamps within the rolling window, oldest first.
    failures: VecDeque<Instant>,
    state_changed_at: Instant,
    /// Set while a single half-open trial call is in flight, so concurrent
    /// callers don't all get admitted as "the" trial.
    half_open_trial_in_flight: bool,
}

/// Closed -> Open -> HalfOpen -> Closed state machine with atomic
/// transitions (§4.10). `allow()` decides admission and performs the
/// Open -> HalfOpen transition when the retry timeout has elapsed;
/// `record_success`/`record_failure` decide HalfOpen -> Closed/Open.
pub struct CircuitBreaker {
    config: FaultToleranceConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(config: FaultToleranceConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                state_changed_at: Instant::now(),
                half_open_trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    fn evict_old_failures(inner: &mut CircuitInner, window: Duration) {
        let cutoff = Instant::now().checked_sub(window).unwrap_or(Instant::now());
        while let Some(front) = inner.failures.front() {
            if *front < cutoff {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether a call may proceed right now. Open admits nothing until the
    /// half-open retry timeout elapses, then admits exactly one trial.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if inner.state_changed_at.elapsed() >= self.config.circuit_half_open_retry_timeout()
                {
                    inner.state = CircuitState::HalfOpen;
                    inner.state_changed_at = Instant::now();
                    inner.half_open_trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_trial_in_flight {
                    false
                } else {
                    inner.half_open_trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                debug!("circuit breaker trial call succeeded, closing circuit");
                inner.state = CircuitState::Closed;
                inner.state_changed_at = Instant::now();
                inner.half_open_trial_in_flight = false;
                inner.failures.clear();
            }
            CircuitState::Closed => {}
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("circuit breaker trial call failed, reopening circuit");
                inner.state = CircuitState::Open;
                inner.state_changed_at = Instant::now();
                inner.half_open_trial_in_flight = false;
            }
            CircuitState::Closed => {
                Self::evict_old_failures(&mut inner, self.config.circuit_window());
                inner.failures.push_back(Instant::now());
                if inner.failures.len() as u32 >= self.config.circuit_failure_threshold {
                    warn!("circuit breaker failure threshold reached, opening circuit");
                    inner.state = CircuitState::Open;
                    inner.state_changed_at = Instant::now();
                    inner.failures.clear();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `f` under the breaker: rejects immediately if not admitted,
    /// otherwise records the outcome and returns it.
    pub async fn call<F, Fut, T>(&self, f: F) -> SchedulerResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
    {
        if !self.allow() {
            return Err(SchedulerError::CircuitOpen);
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

/// Exponential backoff with jitter (§4.10): `min(maxDelay, baseDelay *
/// multiplier^(k-1)) +/- rand(0..jitter)`. Non-retryable errors
/// (`SchedulerError::is_retryable() == false`) abort immediately.
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.config.multiplier.powi(attempt as i32 - 1);
        let raw_ms = (self.config.base_delay_ms as f64 * exp) as u64;
        let capped_ms = raw_ms.min(self.config.max_delay_ms);
        let jitter_ms = if self.config.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.config.jitter_ms)
        };
        Duration::from_millis(capped_ms + jitter_ms)
    }

    pub async fn run<F, Fut, T>(&self, mut f: F) -> SchedulerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.config.max_attempts {
                        return Err(err);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, "retrying after failure");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// A counting semaphore with `maxConcurrentCalls`; callers wait up to
/// `acquireTimeout` before being rejected (§4.10).
pub struct Bulkhead {
    semaphore: Semaphore,
    acquire_timeout: Duration,
}

impl Bulkhead {
    pub fn new(config: &FaultToleranceConfig) -> Self {
        Self {
            semaphore: Semaphore::new(config.bulkhead_max_concurrent_calls),
            acquire_timeout: config.bulkhead_acquire_timeout(),
        }
    }

    pub async fn acquire(&self) -> SchedulerResult<SemaphorePermit<'_>> {
        match tokio::time::timeout(self.acquire_timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            _ => Err(SchedulerError::BulkheadRejected),
        }
    }
}

/// Call priority for graceful degradation (§4.10): `Critical` always
/// passes; `Low`/`Normal` are shed first under load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Tracks active executions and a rolling error count to decide whether to
/// shed load (§4.10). `maxConcurrent` is the denominator for `currentLoad`
/// — typically the pipeline executor's `maxConcurrentPipelines`.
pub struct GracefulDegradation {
    config: FaultToleranceConfig,
    max_concurrent: usize,
    active: AtomicUsize,
    total_calls: AtomicI64,
    total_errors: AtomicI64,
}

impl GracefulDegradation {
    pub fn new(config: FaultToleranceConfig, max_concurrent: usize) -> Self {
        Self {
            config,
            max_concurrent: max_concurrent.max(1),
            active: AtomicUsize::new(0),
            total_calls: AtomicI64::new(0),
            total_errors: AtomicI64::new(0),
        }
    }

    fn current_load(&self) -> f64 {
        self.active.load(Ordering::Relaxed) as f64 / self.max_concurrent as f64
    }

    fn error_rate(&self) -> f64 {
        let calls = self.total_calls.load(Ordering::Relaxed);
        if calls == 0 {
            0.0
        } else {
            self.total_errors.load(Ordering::Relaxed) as f64 / calls as f64
        }
    }

    /// Returns a guard if `priority` is admitted. `Critical` always passes;
    /// otherwise admission is refused once load or error rate crosses the
    /// configured thresholds, except `High` priority still passes through.
    pub fn admit(&self, priority: Priority) -> SchedulerResult<DegradationGuard<'_>> {
        if priority != Priority::Critical {
            let overloaded =
                self.current_load() > self.config.max_load_threshold
                    || self.error_rate() > self.config.max_error_rate_threshold;
            if overloaded && priority != Priority::High {
                return Err(SchedulerError::SystemOverload {
                    reason: format!(
                        "load={:.2} error_rate={:.2} priority={priority:?}",
                        self.current_load(),
                        self.error_rate()
                    ),
                });
            }
        }
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        Ok(DegradationGuard { monitor: self })
    }

    fn release(&self, failed: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        if failed {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Dropped when a degradation-admitted call finishes. Call [`Self::fail`]
/// before dropping if the call failed, so the rolling error rate reflects it.
pub struct DegradationGuard<'a> {
    monitor: &'a GracefulDegradation,
}

impl DegradationGuard<'_> {
    pub fn fail(self) {
        self.monitor.release(true);
        std::mem::forget(self);
    }
}

impl Drop for DegradationGuard<'_> {
    fn drop(&mut self) {
        self.monitor.release(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FaultToleranceConfig {
        FaultToleranceConfig {
            circuit_failure_threshold: 2,
            circuit_window_ms: 60_000,
            circuit_half_open_retry_timeout_ms: 10,
            ..FaultToleranceConfig::default()
        }
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_rejects() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..2 {
            let _: SchedulerResult<()> = breaker
                .call(|| async { Err(SchedulerError::SystemOverload { reason: "x".into() }) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[tokio::test]
    async fn circuit_half_opens_after_timeout_and_closes_on_success() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..2 {
            let _: SchedulerResult<()> = breaker
                .call(|| async { Err(SchedulerError::SystemOverload { reason: "x".into() }) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = breaker.call(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn retry_policy_stops_at_max_attempts() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            jitter_ms: 0,
        });
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: SchedulerResult<()> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { Err(SchedulerError::SystemOverload { reason: "x".into() }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn retry_policy_does_not_retry_non_retryable_errors() {
        let policy = RetryPolicy::new(RetryConfig::default());
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: SchedulerResult<()> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { Err(SchedulerError::BulkheadRejected) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn bulkhead_rejects_when_saturated_past_timeout() {
        let bulkhead = Bulkhead::new(&FaultToleranceConfig {
            bulkhead_max_concurrent_calls: 1,
            bulkhead_acquire_timeout_ms: 10,
            ..FaultToleranceConfig::default()
        });
        let _held = bulkhead.acquire().await.unwrap();
        let result = bulkhead.acquire().await;
        assert!(matches!(result, Err(SchedulerError::BulkheadRejected)));
    }

    #[test]
    fn critical_priority_always_admitted_under_overload() {
        let degradation = GracefulDegradation::new(
            FaultToleranceConfig {
                max_load_threshold: 0.0,
                max_error_rate_threshold: 0.0,
                ..FaultToleranceConfig::default()
            },
            1,
        );
        let _guard = degradation.admit(Priority::Low);
        assert!(degradation.admit(Priority::Critical).is_ok());
    }

    #[test]
    fn low_priority_rejected_once_load_exceeds_threshold() {
        let degradation = GracefulDegradation::new(
            FaultToleranceConfig {
                max_load_threshold: 0.5,
                ..FaultToleranceConfig::default()
            },
            2,
        );
        let _first = degradation.admit(Priority::Low).unwrap();
        let _second = degradation.admit(Priority::Normal).unwrap();
        assert!(matches!(
            degradation.admit(Priority::Low),
            Err(SchedulerError::SystemOverload { .. })
        ));
    }
}
