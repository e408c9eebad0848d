//! The event bus contract (spec §6): one internally-tagged enum carrying
//! every event the orchestrator consumes and produces, published through
//! [`crate::messaging::MessageClient`] onto the queues
//! [`crate::messaging::router::MessageRouterKind`] resolves.

use serde::{Deserialize, Serialize};

use crate::model::MediaType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GatewayEvent {
    GenerationRequested {
        task_id: String,
        request: crate::model::GenerationRequest,
        caller_credential_hash: String,
        caller_credential_id: i64,
        webhook_url: Option<String>,
        webhook_headers: Option<serde_json::Value>,
        correlation_id: String,
    },
    GenerationCancelled {
        task_id: String,
        reason: Option<String>,
        correlation_id: String,
    },
    GenerationStarted {
        task_id: String,
        provider_id: String,
        started_at: chrono::DateTime<chrono::Utc>,
        estimated_seconds: Option<u64>,
        correlation_id: String,
    },
    GenerationProgress {
        task_id: String,
        status: String,
        completed: u32,
        total: u32,
        message: Option<String>,
        correlation_id: String,
    },
    GenerationCompleted {
        task_id: String,
        caller_credential_id: i64,
        artifacts: Vec<crate::model::MediaArtifact>,
        duration_ms: u64,
        cost: f64,
        provider_id: String,
        model: String,
        correlation_id: String,
    },
    GenerationFailed {
        task_id: String,
        error: String,
        error_code: String,
        is_retryable: bool,
        retry_count: u32,
        max_retries: u32,
        next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
        failed_at: chrono::DateTime<chrono::Utc>,
        correlation_id: String,
    },
    MediaGenerationCompleted {
        media_type: MediaType,
        caller_credential_id: i64,
        url: String,
        storage_key: String,
        size_bytes: u64,
        content_type: String,
        model: String,
        prompt: String,
        generated_at: chrono::DateTime<chrono::Utc>,
        metadata: serde_json::Value,
        correlation_id: String,
    },
    WebhookDeliveryRequested {
        task_id: String,
        task_type: crate::model::TaskType,
        url: String,
        event_type: String,
        payload_json: serde_json::Value,
        headers: Option<serde_json::Value>,
        correlation_id: String,
    },
    SpendUpdateRequested {
        caller_credential_id: i64,
        amount: f64,
        request_id: String,
        correlation_id: String,
    },
    ProviderHealthChanged {
        provider_id: String,
        is_healthy: bool,
        status: String,
        correlation_id: String,
    },
    ModelCapabilitiesDiscovered {
        provider_id: String,
        capabilities_per_model: serde_json::Value,
        discovered_at: chrono::DateTime<chrono::Utc>,
        correlation_id: String,
    },
}

impl GatewayEvent {
    /// Every event carries a `correlation_id` used end-to-end for tracing.
    pub fn correlation_id(&self) -> &str {
        match self {
            GatewayEvent::GenerationRequested { correlation_id, .. }
            | GatewayEvent::GenerationCancelled { correlation_id, .. }
            | GatewayEvent::GenerationStarted { correlation_id, .. }
            | GatewayEvent::GenerationProgress { correlation_id, .. }
            | GatewayEvent::GenerationCompleted { correlation_id, .. }
            | GatewayEvent::GenerationFailed { correlation_id, .. }
            | GatewayEvent::MediaGenerationCompleted { correlation_id, .. }
            | GatewayEvent::WebhookDeliveryRequested { correlation_id, .. }
            | GatewayEvent::SpendUpdateRequested { correlation_id, .. }
            | GatewayEvent::ProviderHealthChanged { correlation_id, .. }
            | GatewayEvent::ModelCapabilitiesDiscovered { correlation_id, .. } => correlation_id,
        }
    }

    /// Name used for logging and for the `event_type` field on webhook
    /// payload envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayEvent::GenerationRequested { .. } => "generation_requested",
            GatewayEvent::GenerationCancelled { .. } => "generation_cancelled",
            GatewayEvent::GenerationStarted { .. } => "generation_started",
            GatewayEvent::GenerationProgress { .. } => "generation_progress",
            GatewayEvent::GenerationCompleted { .. } => "generation_completed",
            GatewayEvent::GenerationFailed { .. } => "generation_failed",
            GatewayEvent::MediaGenerationCompleted { .. } => "media_generation_completed",
            GatewayEvent::WebhookDeliveryRequested { .. } => "webhook_delivery_requested",
            GatewayEvent::SpendUpdateRequested { .. } => "spend_update_requested",
            GatewayEvent::ProviderHealthChanged { .. } => "provider_health_changed",
            GatewayEvent::ModelCapabilitiesDiscovered { .. } => "model_capabilities_discovered",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_roundtrips_through_serde() {
        let event = GatewayEvent::GenerationCancelled {
            task_id: "t1".into(),
            reason: None,
            correlation_id: "corr-1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: GatewayEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.correlation_id(), "corr-1");
        assert_eq!(back.kind(), "generation_cancelled");
    }
}
