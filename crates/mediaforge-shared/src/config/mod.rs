//! Configuration loading: a base TOML file layered with `MEDIAFORGE_*`
//! environment overrides, plus `.env` loading for local development.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Retry configuration per task type (spec §6 "Retry configuration").
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    pub enable_retries: bool,
    pub max_retries: u32,
    pub base_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub jitter_fraction: f64,
}

impl RetryConfig {
    pub fn base(&self) -> Duration {
        Duration::from_secs(self.base_delay_seconds)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs(self.max_delay_seconds)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enable_retries: true,
            max_retries: 3,
            base_delay_seconds: 30,
            max_delay_seconds: 3600,
            jitter_fraction: 0.2,
        }
    }
}

/// Tunables for the per-provider circuit breaker (§4.6).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u64,
    pub timeout_seconds: u64,
    pub success_threshold: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 600,
            success_threshold: 1,
        }
    }
}

/// Tunables for the Task Status Cache (§4.2).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TaskCacheSettings {
    pub active_ttl_seconds: u64,
    pub terminal_ttl_seconds: u64,
    pub max_capacity: u64,
}

impl Default for TaskCacheSettings {
    fn default() -> Self {
        Self {
            active_ttl_seconds: 24 * 3600,
            terminal_ttl_seconds: 2 * 3600,
            max_capacity: 100_000,
        }
    }
}

/// Tunables for the Batched Cache Invalidator (§4.7).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct InvalidatorSettings {
    pub enabled: bool,
    pub flush_window_millis: u64,
    pub max_batch_size: usize,
    pub coalesce: bool,
}

impl Default for InvalidatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            flush_window_millis: 100,
            max_batch_size: 500,
            coalesce: true,
        }
    }
}

/// Tunables for the Provider Health Monitor (§4.6).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HealthMonitorSettings {
    pub health_check_interval_seconds: u64,
    pub metrics_eval_interval_seconds: u64,
    pub slow_response_threshold_ms: u64,
}

impl Default for HealthMonitorSettings {
    fn default() -> Self {
        Self {
            health_check_interval_seconds: 300,
            metrics_eval_interval_seconds: 60,
            slow_response_threshold_ms: 2000,
        }
    }
}

/// Tunables for the Discovery & Capability Resolver (§4.8).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DiscoverySettings {
    pub capability_cache_ttl_seconds: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            capability_cache_ttl_seconds: 24 * 3600,
        }
    }
}

/// Tunables for the Artifact Pipeline (§4.5).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ArtifactPipelineSettings {
    pub default_provider_concurrency: usize,
    pub download_timeout_seconds: u64,
}

impl Default for ArtifactPipelineSettings {
    fn default() -> Self {
        Self {
            default_provider_concurrency: 4,
            download_timeout_seconds: 30,
        }
    }
}

/// Root application configuration, loaded once at process start.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub amqp_url: String,
    #[serde(default)]
    pub image_retry: RetryConfig,
    #[serde(default)]
    pub video_retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub task_cache: TaskCacheSettings,
    #[serde(default)]
    pub invalidator: InvalidatorSettings,
    #[serde(default)]
    pub health_monitor: HealthMonitorSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub artifact_pipeline: ArtifactPipelineSettings,
}

impl AppConfig {
    /// Load `.env` (if present), then a base TOML file (if present), then
    /// `MEDIAFORGE_*` environment overrides (double-underscore separated for
    /// nesting, e.g. `MEDIAFORGE_CIRCUIT_BREAKER__FAILURE_THRESHOLD`).
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => tracing::debug!("loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "failed to load .env file"),
        }

        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(false));
        } else {
            builder = builder.add_source(File::with_name("config/default").required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix("MEDIAFORGE")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
