//! Per-provider circuit breaker wrapping the generic
//! `mediaforge_shared::resilience::CircuitBreaker`, in the same "wrap, don't
//! reimplement" shape the health monitor's dispatch gate needs: unified
//! state machine behavior behind a provider-specific, friendlier API.

use std::sync::Arc;
use std::time::Duration;

use mediaforge_shared::resilience::{
    CircuitBreaker, CircuitBreakerBehavior, CircuitBreakerMetrics, CircuitState,
};

/// Tunables for one provider's circuit breaker (spec §4.6).
#[derive(Debug, Clone, Copy)]
pub struct ProviderCircuitBreakerConfig {
    pub failure_threshold: u64,
    pub recovery_timeout_seconds: u64,
    pub success_threshold: u64,
}

impl Default for ProviderCircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 600,
            success_threshold: 1,
        }
    }
}

/// Gates dispatch to one provider. `ProviderHealthMonitor` owns one of
/// these per provider id.
#[derive(Debug, Clone)]
pub struct ProviderCircuitBreaker {
    breaker: Arc<CircuitBreaker>,
}

impl ProviderCircuitBreaker {
    pub fn new(provider_id: impl Into<String>, config: ProviderCircuitBreakerConfig) -> Self {
        let resilience_config = mediaforge_shared::resilience::CircuitBreakerConfig {
            failure_threshold: config.failure_threshold,
            timeout: Duration::from_secs(config.recovery_timeout_seconds),
            success_threshold: config.success_threshold,
        };
        Self {
            breaker: Arc::new(CircuitBreaker::new(provider_id.into(), resilience_config)),
        }
    }

    /// True when dispatch to this provider should be refused right now
    /// (spec §4.6 "while Open, dispatch is refused").
    pub fn is_open(&self) -> bool {
        !self.breaker.should_allow()
    }

    pub fn record_success(&self, duration: Duration) {
        self.breaker.record_success_manual(duration);
    }

    pub fn record_failure(&self, duration: Duration) {
        self.breaker.record_failure_manual(duration);
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn is_healthy(&self) -> bool {
        self.breaker.is_healthy()
    }

    pub fn force_open(&self) {
        self.breaker.force_open();
    }

    pub fn force_closed(&self) {
        self.breaker.force_closed();
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.breaker.metrics()
    }
}

impl CircuitBreakerBehavior for ProviderCircuitBreaker {
    fn name(&self) -> &str {
        self.breaker.name()
    }

    fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn should_allow(&self) -> bool {
        self.breaker.should_allow()
    }

    fn record_success(&self, duration: Duration) {
        self.breaker.record_success_manual(duration);
    }

    fn record_failure(&self, duration: Duration) {
        self.breaker.record_failure_manual(duration);
    }

    fn is_healthy(&self) -> bool {
        self.breaker.is_healthy()
    }

    fn force_open(&self) {
        self.breaker.force_open();
    }

    fn force_closed(&self) {
        self.breaker.force_closed();
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        self.breaker.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let cb = ProviderCircuitBreaker::new("p1", ProviderCircuitBreakerConfig::default());
        assert!(!cb.is_open());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = ProviderCircuitBreaker::new(
            "p1",
            ProviderCircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout_seconds: 60,
                success_threshold: 2,
            },
        );
        cb.record_failure(Duration::from_millis(1));
        cb.record_failure(Duration::from_millis(1));
        assert!(!cb.is_open());
        cb.record_failure(Duration::from_millis(1));
        assert!(cb.is_open());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let cb = ProviderCircuitBreaker::new(
            "p1",
            ProviderCircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout_seconds: 60,
                success_threshold: 1,
            },
        );
        cb.record_failure(Duration::from_millis(1));
        cb.record_failure(Duration::from_millis(1));
        assert_eq!(cb.metrics().consecutive_failures, 2);
        cb.record_success(Duration::from_millis(1));
        assert_eq!(cb.metrics().consecutive_failures, 0);
    }

    #[test]
    fn half_open_after_timeout_closes_on_success() {
        let cb = ProviderCircuitBreaker::new(
            "p1",
            ProviderCircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout_seconds: 0,
                success_threshold: 1,
            },
        );
        cb.record_failure(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_open());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success(Duration::from_millis(1));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn behaves_as_trait_object() {
        let cb = ProviderCircuitBreaker::new("p1", ProviderCircuitBreakerConfig::default());
        let behavior: &dyn CircuitBreakerBehavior = &cb;
        assert_eq!(behavior.name(), "p1");
        assert!(behavior.should_allow());
    }
}
