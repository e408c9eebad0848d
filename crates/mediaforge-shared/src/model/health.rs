//! The data half of provider health (spec §3 `ProviderHealth`). The circuit
//! breaker behavior that accompanies this record lives in
//! `mediaforge-orchestration::health`, which owns one `CircuitBreaker` per
//! provider alongside this record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub is_healthy: bool,
    pub health_score: f64,
    pub consecutive_failures: u32,
    pub last_check_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_response_time_ms: u64,
}

impl ProviderHealth {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            is_healthy: true,
            health_score: 1.0,
            consecutive_failures: 0,
            last_check_at: Utc::now(),
            last_success_at: None,
            last_response_time_ms: 0,
        }
    }

    /// Health score formula from spec §4.6, output clamped to `[0,1]`.
    pub fn recompute_score(&mut self, slow_threshold_ms: u64, probe_succeeded: bool) {
        let mut score = 1.0;
        score -= (0.1 * self.consecutive_failures as f64).min(0.5);

        if self.last_response_time_ms > slow_threshold_ms {
            let over = (self.last_response_time_ms - slow_threshold_ms) as f64;
            let penalty = (over / slow_threshold_ms.max(1) as f64 * 0.3).min(0.3);
            score -= penalty;
        }

        if !probe_succeeded {
            score -= 0.3;
        }

        if let Some(last_success) = self.last_success_at {
            if Utc::now() - last_success < chrono::Duration::minutes(5) {
                score += 0.1;
            }
        }

        self.health_score = score.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_starts_at_one() {
        let health = ProviderHealth::new("p1");
        assert_eq!(health.health_score, 1.0);
    }

    #[test]
    fn score_clamped_to_zero_one() {
        let mut health = ProviderHealth::new("p1");
        health.consecutive_failures = 20;
        health.last_response_time_ms = 100_000;
        health.recompute_score(2000, false);
        assert!(health.health_score >= 0.0);
        assert!(health.health_score <= 1.0);
    }

    #[test]
    fn recent_success_adds_bonus() {
        let mut health = ProviderHealth::new("p1");
        health.last_success_at = Some(Utc::now());
        health.recompute_score(2000, true);
        assert!(health.health_score > 1.0 - f64::EPSILON || health.health_score == 1.0);
    }
}
