//! `ProviderHealthMonitor` (spec §4.6): owns one `ProviderCircuitBreaker` +
//! `ProviderHealth` record per provider id and runs two independent periodic
//! timers — a liveness probe and a metrics-eval pass that recomputes the
//! health score from the breaker's own counters, rather than re-probing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mediaforge_shared::config::HealthMonitorSettings;
use mediaforge_shared::messaging::{GatewayEvent, MessageClient};
use mediaforge_shared::model::ProviderHealth;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use super::circuit_breaker::{ProviderCircuitBreaker, ProviderCircuitBreakerConfig};
use crate::provider_client::ProviderClient;

struct ProviderEntry {
    circuit_breaker: ProviderCircuitBreaker,
    health: AsyncMutex<ProviderHealth>,
    client: Arc<dyn ProviderClient>,
}

/// A point-in-time read of one provider's health, for status endpoints
/// and the discovery resolver's dispatch decisions (spec §4.8).
#[derive(Debug, Clone)]
pub struct ProviderHealthSnapshot {
    pub provider_id: String,
    pub is_healthy: bool,
    pub health_score: f64,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
}

/// Owns health state for every registered provider and drives it forward
/// with two `tokio::time::interval` timers: a liveness probe on
/// `health_check_interval_seconds`, and a score recompute on
/// `metrics_eval_interval_seconds` that also republishes
/// `ProviderHealthChanged` when the healthy/unhealthy boundary flips.
pub struct ProviderHealthMonitor {
    providers: DashMap<String, Arc<ProviderEntry>>,
    settings: HealthMonitorSettings,
    cb_config: ProviderCircuitBreakerConfig,
    events: Arc<MessageClient>,
}

impl ProviderHealthMonitor {
    pub fn new(
        settings: HealthMonitorSettings,
        cb_config: ProviderCircuitBreakerConfig,
        events: Arc<MessageClient>,
    ) -> Self {
        Self {
            providers: DashMap::new(),
            settings,
            cb_config,
            events,
        }
    }

    pub fn register(&self, client: Arc<dyn ProviderClient>) {
        let provider_id = client.provider_id().to_string();
        self.providers.insert(
            provider_id.clone(),
            Arc::new(ProviderEntry {
                circuit_breaker: ProviderCircuitBreaker::new(provider_id.clone(), self.cb_config),
                health: AsyncMutex::new(ProviderHealth::new(provider_id)),
                client,
            }),
        );
    }

    pub fn circuit_breaker(&self, provider_id: &str) -> Option<ProviderCircuitBreaker> {
        self.providers
            .get(provider_id)
            .map(|e| e.circuit_breaker.clone())
    }

    pub async fn snapshot(&self, provider_id: &str) -> Option<ProviderHealthSnapshot> {
        let entry = self.providers.get(provider_id)?.clone();
        let health = entry.health.lock().await;
        Some(ProviderHealthSnapshot {
            provider_id: health.provider_id.clone(),
            is_healthy: health.is_healthy,
            health_score: health.health_score,
            consecutive_failures: health.consecutive_failures,
            circuit_open: entry.circuit_breaker.is_open(),
        })
    }

    pub async fn snapshot_all(&self) -> Vec<ProviderHealthSnapshot> {
        let mut out = Vec::with_capacity(self.providers.len());
        for entry in self.providers.iter() {
            let health = entry.health.lock().await;
            out.push(ProviderHealthSnapshot {
                provider_id: health.provider_id.clone(),
                is_healthy: health.is_healthy,
                health_score: health.health_score,
                consecutive_failures: health.consecutive_failures,
                circuit_open: entry.circuit_breaker.is_open(),
            });
        }
        out
    }

    /// Runs both periodic timers until cancelled; intended to be spawned as
    /// one background task per `ProviderHealthMonitor` instance.
    pub async fn run(self: Arc<Self>, cancellation: tokio_util::sync::CancellationToken) {
        let probe_monitor = self.clone();
        let probe_cancellation = cancellation.clone();
        let probe_task = tokio::spawn(async move {
            probe_monitor.run_probe_loop(probe_cancellation).await;
        });

        let eval_monitor = self.clone();
        let eval_task = tokio::spawn(async move {
            eval_monitor.run_eval_loop(cancellation).await;
        });

        let _ = tokio::join!(probe_task, eval_task);
    }

    async fn run_probe_loop(&self, cancellation: tokio_util::sync::CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.settings.health_check_interval_seconds));
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = ticker.tick() => self.probe_all().await,
            }
        }
    }

    async fn run_eval_loop(&self, cancellation: tokio_util::sync::CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            self.settings.metrics_eval_interval_seconds,
        ));
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = ticker.tick() => self.eval_all().await,
            }
        }
    }

    async fn probe_all(&self) {
        let entries: Vec<_> = self
            .providers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (provider_id, entry) in entries {
            let start = std::time::Instant::now();
            let result = entry.client.health().await;
            let elapsed = start.elapsed();
            match &result {
                Ok(_) => entry.circuit_breaker.record_success(elapsed),
                Err(_) => entry.circuit_breaker.record_failure(elapsed),
            }

            let mut health = entry.health.lock().await;
            health.last_check_at = chrono::Utc::now();
            health.last_response_time_ms = elapsed.as_millis() as u64;
            match &result {
                Ok(_) => {
                    health.last_success_at = Some(chrono::Utc::now());
                    health.consecutive_failures = 0;
                }
                Err(e) => {
                    health.consecutive_failures += 1;
                    tracing::warn!(provider_id = %provider_id, error = %e, "provider health probe failed");
                }
            }
            health.recompute_score(self.settings.slow_response_threshold_ms, result.is_ok());
        }
    }

    async fn eval_all(&self) {
        let entries: Vec<_> = self
            .providers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (provider_id, entry) in entries {
            let previously_healthy;
            let now_healthy;
            {
                let mut health = entry.health.lock().await;
                previously_healthy = health.is_healthy;
                now_healthy = health.health_score >= 0.3 && !entry.circuit_breaker.is_open();
                health.is_healthy = now_healthy;
            }

            if previously_healthy != now_healthy {
                let health = entry.health.lock().await;
                let status = if now_healthy { "healthy" } else { "unhealthy" };
                let event = GatewayEvent::ProviderHealthChanged {
                    provider_id: provider_id.clone(),
                    is_healthy: now_healthy,
                    status: status.to_string(),
                    correlation_id: Uuid::new_v4().to_string(),
                };
                drop(health);
                if let Err(e) = self.events.publish_event(event).await {
                    tracing::warn!(provider_id = %provider_id, error = %e, "failed to publish provider health change");
                }
            }
        }
    }
}
