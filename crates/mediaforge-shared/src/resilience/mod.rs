//! Generic circuit breaker state machine.
//!
//! `CircuitBreaker` is the concrete primitive that domain-specific wrappers
//! (provider health, messaging) build on. It holds no knowledge of what it is
//! protecting — callers record successes/failures and consult `should_allow`
//! before attempting work, exactly the shape `CircuitBreakerBehavior` exposes
//! as an object-safe trait for uniform access across wrappers.

pub mod behavior;
pub mod metrics;

pub use behavior::CircuitBreakerBehavior;
pub use metrics::{CircuitBreakerMetrics, MetricsCollector, PrometheusMetricsExporter};

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The three states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed,
    /// Calls are rejected until `timeout` has elapsed since the trip.
    Open,
    /// A single trial call is allowed to decide whether to close or reopen.
    HalfOpen,
}

/// Tunables for a `CircuitBreaker`.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (in Closed state) that trip the breaker.
    pub failure_threshold: u64,
    /// How long the breaker stays Open before allowing a trial call.
    pub timeout: Duration,
    /// Consecutive successes in HalfOpen required to close the breaker.
    pub success_threshold: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(600),
            success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u64,
    consecutive_successes: u64,
    opened_at: Option<Instant>,
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
    half_open_calls: u64,
    total_duration: Duration,
    recent_durations: VecDeque<Duration>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            half_open_calls: 0,
            total_duration: Duration::ZERO,
            recent_durations: VecDeque::with_capacity(64),
        }
    }
}

const RECENT_DURATIONS_CAP: usize = 64;

/// A per-component circuit breaker. Thread-safe, cheap to clone behind an
/// `Arc` by callers; interior state is guarded by a short-lived std mutex,
/// never held across an `.await`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.transition_if_timeout_elapsed();
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    /// Move an Open breaker to HalfOpen once its timeout has elapsed. Called
    /// opportunistically from every read/write path so state() always
    /// reflects reality without a background task.
    fn transition_if_timeout_elapsed(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        if guard.state == CircuitState::Open {
            if let Some(opened_at) = guard.opened_at {
                if opened_at.elapsed() >= self.config.timeout {
                    guard.state = CircuitState::HalfOpen;
                    guard.consecutive_successes = 0;
                    guard.half_open_calls = 0;
                    tracing::info!(
                        circuit_breaker = %self.name,
                        "circuit breaker timeout elapsed, entering half-open"
                    );
                }
            }
        }
    }

    /// Whether a call should be attempted right now.
    pub fn should_allow(&self) -> bool {
        self.transition_if_timeout_elapsed();
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        match guard.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                // Allow exactly one trial call in flight at a time.
                if guard.half_open_calls == 0 {
                    guard.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success_manual(&self, duration: Duration) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        guard.total_calls += 1;
        guard.success_count += 1;
        guard.total_duration += duration;
        push_duration(&mut guard.recent_durations, duration);
        guard.consecutive_failures = 0;

        match guard.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= self.config.success_threshold {
                    guard.state = CircuitState::Closed;
                    guard.opened_at = None;
                    guard.consecutive_successes = 0;
                    guard.half_open_calls = 0;
                    tracing::info!(circuit_breaker = %self.name, "circuit breaker closed after recovery");
                }
            }
            CircuitState::Open => {
                // Timeout-elapsed transition should have already moved us to
                // HalfOpen before a caller could observe Open and still call
                // record_success; nothing to do here.
            }
        }
    }

    pub fn record_failure_manual(&self, duration: Duration) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        guard.total_calls += 1;
        guard.failure_count += 1;
        guard.total_duration += duration;
        push_duration(&mut guard.recent_durations, duration);
        guard.consecutive_failures += 1;
        guard.consecutive_successes = 0;

        match guard.state {
            CircuitState::Closed => {
                if guard.consecutive_failures >= self.config.failure_threshold {
                    guard.state = CircuitState::Open;
                    guard.opened_at = Some(Instant::now());
                    tracing::warn!(
                        circuit_breaker = %self.name,
                        consecutive_failures = guard.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.opened_at = Some(Instant::now());
                guard.half_open_calls = 0;
                tracing::warn!(circuit_breaker = %self.name, "trial call failed, circuit breaker reopened");
            }
            CircuitState::Open => {}
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }

    pub fn force_open(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        guard.state = CircuitState::Open;
        guard.opened_at = Some(Instant::now());
        tracing::warn!(circuit_breaker = %self.name, "circuit breaker forced open");
    }

    pub fn force_closed(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        guard.state = CircuitState::Closed;
        guard.opened_at = None;
        guard.consecutive_failures = 0;
        guard.consecutive_successes = 0;
        guard.half_open_calls = 0;
        tracing::info!(circuit_breaker = %self.name, "circuit breaker forced closed");
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.transition_if_timeout_elapsed();
        let guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        let total_calls = guard.total_calls;
        let failure_rate = if total_calls == 0 {
            0.0
        } else {
            guard.failure_count as f64 / total_calls as f64
        };
        let success_rate = if total_calls == 0 {
            0.0
        } else {
            guard.success_count as f64 / total_calls as f64
        };
        let average_duration = if guard.recent_durations.is_empty() {
            Duration::ZERO
        } else {
            guard.recent_durations.iter().sum::<Duration>() / guard.recent_durations.len() as u32
        };
        CircuitBreakerMetrics {
            total_calls,
            success_count: guard.success_count,
            failure_count: guard.failure_count,
            consecutive_failures: guard.consecutive_failures,
            half_open_calls: guard.half_open_calls,
            total_duration: guard.total_duration,
            current_state: guard.state,
            failure_rate,
            success_rate,
            average_duration,
        }
    }
}

fn push_duration(buf: &mut VecDeque<Duration>, d: Duration) {
    if buf.len() == RECENT_DURATIONS_CAP {
        buf.pop_front();
    }
    buf.push_back(d);
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        self.name()
    }

    fn state(&self) -> CircuitState {
        self.state()
    }

    fn should_allow(&self) -> bool {
        self.should_allow()
    }

    fn record_success(&self, duration: Duration) {
        self.record_success_manual(duration)
    }

    fn record_failure(&self, duration: Duration) {
        self.record_failure_manual(duration)
    }

    fn is_healthy(&self) -> bool {
        self.is_healthy()
    }

    fn force_open(&self) {
        self.force_open()
    }

    fn force_closed(&self) {
        self.force_closed()
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout: Duration::from_millis(50),
                success_threshold: 1,
            },
        )
    }

    #[test]
    fn starts_closed_and_allows_calls() {
        let cb = breaker(3);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.should_allow());
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = breaker(3);
        for _ in 0..3 {
            cb.record_failure_manual(Duration::from_millis(1));
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow());
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let cb = breaker(3);
        cb.record_failure_manual(Duration::from_millis(1));
        cb.record_failure_manual(Duration::from_millis(1));
        cb.record_success_manual(Duration::from_millis(1));
        cb.record_failure_manual(Duration::from_millis(1));
        cb.record_failure_manual(Duration::from_millis(1));
        // Only two consecutive failures since the reset, threshold is 3.
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_millis(10),
                success_threshold: 2,
            },
        );
        cb.record_failure_manual(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success_manual(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success_manual(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = breaker(1);
        cb.record_failure_manual(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure_manual(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn force_open_and_force_closed_override_state() {
        let cb = breaker(3);
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.should_allow());
    }

    #[test]
    fn behaves_as_trait_object() {
        let cb = breaker(3);
        let behavior: &dyn CircuitBreakerBehavior = &cb;
        assert_eq!(behavior.name(), "test");
        assert!(behavior.should_allow());
    }
}
