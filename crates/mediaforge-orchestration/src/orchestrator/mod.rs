//! The Orchestrator (spec §4.4): the top-level `handle_generation_requested`
//! / `handle_generation_cancelled` entry points and the sequencing shared by
//! both task flavors. Organized the way the spec's §9 redesign note asks
//! for — one `Orchestrator` struct, with `image` and `video` holding the two
//! flavor-specific dispatch functions (sharing this module's sequencing but
//! differing in upstream invocation shape), and `cost`/`webhooks` naming the
//! two external-collaborator seams (cost computation, webhook delivery).
//! `cancellation` and `artifact` are not separate submodules here — they
//! delegate straight through to the already-built `registry` and `artifact`
//! modules rather than being reimplemented.

mod cost;
mod image;
mod progress;
mod video;
mod webhooks;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use mediaforge_shared::config::{ArtifactPipelineSettings, RetryConfig};
use mediaforge_shared::errors::{GatewayError, RetryPolicy, Retryability};
use mediaforge_shared::messaging::{GatewayEvent, MessageClient};
use mediaforge_shared::model::{MediaArtifact, Task, TaskState, TaskType};
use uuid::Uuid;

pub use cost::{CostCalculator, FlatRateCostCalculator};
pub use webhooks::{ImageCompletionWebhookPayload, VideoCompletionWebhookPayload, WebhookStatus};

use crate::artifact::ArtifactPipeline;
use crate::cache::SharedTaskStatusCache;
use crate::discovery::DiscoveryResolver;
use crate::health::monitor::ProviderHealthMonitor;
use crate::provider_client::{ProviderClientFactory, UsageRecord};
use crate::registry::CancellableTaskRegistry;
use crate::store::TaskStore;

/// Guarantees `CancellableTaskRegistry::unregister` runs on every exit path
/// out of a dispatch, including early returns, without a manual
/// try/finally-shaped match in each branch.
struct UnregisterGuard {
    registry: Arc<CancellableTaskRegistry>,
    task_id: String,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.task_id);
    }
}

/// Wires every other component in this crate into the dispatch sequence
/// spec §4.4 describes. One instance is shared (behind an `Arc`) by every
/// worker task consuming the request queues.
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    cache: SharedTaskStatusCache,
    registry: Arc<CancellableTaskRegistry>,
    discovery: Arc<DiscoveryResolver>,
    health: Arc<ProviderHealthMonitor>,
    provider_factory: Arc<dyn ProviderClientFactory>,
    artifact_pipeline: Arc<ArtifactPipeline>,
    cost: Arc<dyn CostCalculator>,
    events: Arc<MessageClient>,
    image_retry: RetryConfig,
    video_retry: RetryConfig,
    artifact_settings: ArtifactPipelineSettings,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn TaskStore>,
        cache: SharedTaskStatusCache,
        registry: Arc<CancellableTaskRegistry>,
        discovery: Arc<DiscoveryResolver>,
        health: Arc<ProviderHealthMonitor>,
        provider_factory: Arc<dyn ProviderClientFactory>,
        artifact_pipeline: Arc<ArtifactPipeline>,
        cost: Arc<dyn CostCalculator>,
        events: Arc<MessageClient>,
        image_retry: RetryConfig,
        video_retry: RetryConfig,
        artifact_settings: ArtifactPipelineSettings,
    ) -> Self {
        Self {
            store,
            cache,
            registry,
            discovery,
            health,
            provider_factory,
            artifact_pipeline,
            cost,
            events,
            image_retry,
            video_retry,
            artifact_settings,
        }
    }

    /// Entry point for a consumed `GenerationRequested` event. Loads the
    /// authoritative `Task` from the store rather than trusting the event's
    /// own copy of the request, so a sweeper-driven redispatch (which has
    /// no original event, only the stored `Task`) can call this same path.
    pub async fn handle_generation_requested(
        &self,
        task_id: &str,
        correlation_id: &str,
    ) -> Result<(), GatewayError> {
        let task = self.store.get(task_id).await?;
        if task.state.is_terminal() {
            tracing::debug!(task_id = %task_id, "ignoring generation request for already-terminal task");
            return Ok(());
        }

        match task.task_type {
            TaskType::Image => self.run_image(task, correlation_id).await,
            TaskType::Video => self.run_video(task, correlation_id).await,
            TaskType::Other => {
                let err = GatewayError::Internal(format!(
                    "task {} has unsupported type 'other'",
                    task.id
                ));
                self.finish_failed_or_retry(task, correlation_id, err).await
            }
        }
    }

    /// Entry point for a consumed `GenerationCancelled` event. Idempotent:
    /// a second delivery for an already-terminal task is a no-op, not an
    /// error.
    pub async fn handle_generation_cancelled(
        &self,
        task_id: &str,
        correlation_id: &str,
    ) -> Result<(), GatewayError> {
        let current = self.store.get(task_id).await?;
        if current.state.is_terminal() {
            tracing::debug!(task_id = %task_id, "cancellation for already-terminal task is a no-op");
            return Ok(());
        }

        let updated = self
            .store
            .update(
                task_id,
                Box::new(|t| {
                    t.state = TaskState::Cancelled;
                    t.error = Some("cancelled by caller".to_string());
                    t.error_code = Some("cancelled".to_string());
                    Ok(())
                }),
            )
            .await?;
        self.cache.put(&updated).await;

        let signalled = self.registry.try_cancel(task_id);
        tracing::info!(task_id = %task_id, signalled, "applied generation cancellation");

        let ack_event = GatewayEvent::GenerationProgress {
            task_id: updated.id.clone(),
            status: "cancelled".to_string(),
            completed: 0,
            total: 0,
            message: Some("cancellation acknowledged".to_string()),
            correlation_id: correlation_id.to_string(),
        };
        self.publish_best_effort(ack_event, &updated.id, "cancellation acknowledgement")
            .await;

        if let Some(event) = webhooks::cancellation_event(&updated) {
            self.publish_best_effort(event, &updated.id, "webhook delivery requested (cancelled)")
                .await;
        }

        Ok(())
    }

    async fn transition_processing(&self, task_id: &str) -> Result<Task, GatewayError> {
        let task = self
            .store
            .update(
                task_id,
                Box::new(|t| {
                    t.state = TaskState::Processing;
                    t.progress_percent = 0;
                    t.progress_message = Some("processing".to_string());
                    Ok(())
                }),
            )
            .await?;
        self.cache.put(&task).await;
        Ok(task)
    }

    async fn emit_started(&self, task: &Task, provider_id: &str, correlation_id: &str) {
        let event = GatewayEvent::GenerationStarted {
            task_id: task.id.clone(),
            provider_id: provider_id.to_string(),
            started_at: Utc::now(),
            estimated_seconds: None,
            correlation_id: correlation_id.to_string(),
        };
        self.publish_best_effort(event, &task.id, "generation started").await;
    }

    async fn publish_best_effort(&self, event: GatewayEvent, task_id: &str, what: &str) {
        if let Err(e) = self.events.publish_event(event).await {
            tracing::warn!(task_id = %task_id, kind = %what, error = %e, "failed to publish event");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_completed(
        &self,
        task: Task,
        correlation_id: &str,
        provider_id: &str,
        model: &str,
        artifacts: Vec<MediaArtifact>,
        usage: &UsageRecord,
        attempt_start: Instant,
    ) -> Result<(), GatewayError> {
        let cost = match self.cost.compute_cost(provider_id, model, usage).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "cost computation failed, recording zero cost");
                0.0
            }
        };
        let duration = attempt_start.elapsed();
        let result_json = serde_json::to_value(&artifacts).map_err(|e| {
            GatewayError::Internal(format!(
                "failed to serialize artifacts for task {}: {e}",
                task.id
            ))
        })?;

        let updated = self
            .store
            .update(
                &task.id,
                Box::new(move |t| {
                    t.state = TaskState::Completed;
                    t.progress_percent = 100;
                    t.progress_message = None;
                    t.result = Some(result_json);
                    Ok(())
                }),
            )
            .await?;
        self.cache.put(&updated).await;

        let completed_event = GatewayEvent::GenerationCompleted {
            task_id: updated.id.clone(),
            caller_credential_id: updated.owner_key_id,
            artifacts: artifacts.clone(),
            duration_ms: duration.as_millis() as u64,
            cost,
            provider_id: provider_id.to_string(),
            model: model.to_string(),
            correlation_id: correlation_id.to_string(),
        };
        self.publish_best_effort(completed_event, &updated.id, "generation completed")
            .await;

        if let Some(event) = webhooks::completion_event(&updated, &artifacts, duration, model) {
            self.publish_best_effort(event, &updated.id, "webhook delivery requested (completed)")
                .await;
        }

        if cost > 0.0 {
            let spend_event = GatewayEvent::SpendUpdateRequested {
                caller_credential_id: updated.owner_key_id,
                amount: cost,
                request_id: Uuid::new_v4().to_string(),
                correlation_id: correlation_id.to_string(),
            };
            self.publish_best_effort(spend_event, &updated.id, "spend update requested")
                .await;
        }

        Ok(())
    }

    async fn finish_failed_or_retry(
        &self,
        task: Task,
        correlation_id: &str,
        error: GatewayError,
    ) -> Result<(), GatewayError> {
        if matches!(error, GatewayError::Cancelled) {
            // The store transition to `Cancelled` and its webhook are the
            // cancellation handler's job, not this one's — it may already
            // be in flight on another worker.
            tracing::debug!(task_id = %task.id, "dispatch observed cancellation, deferring to the cancellation handler");
            return Ok(());
        }

        let retryable = matches!(error.classify(), Retryability::Retryable);
        let retry_cfg = if task.task_type == TaskType::Video {
            self.video_retry
        } else {
            self.image_retry
        };
        let can_retry = retryable && retry_cfg.enable_retries && task.retry_count < task.max_retries;

        let error_text = error.user_message();
        let error_code = error.error_code();
        let retry_count = task.retry_count;
        let max_retries = task.max_retries;

        let updated = if can_retry {
            let policy = retry_policy(&retry_cfg);
            let delay = policy.backoff(task.retry_count);
            let next_retry_at =
                Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            let text_for_store = error_text.clone();
            self.store
                .update(
                    &task.id,
                    Box::new(move |t| {
                        t.state = TaskState::Pending;
                        t.retry_count += 1;
                        t.next_retry_at = Some(next_retry_at);
                        t.progress_message = Some(format!("retry scheduled after: {text_for_store}"));
                        Ok(())
                    }),
                )
                .await?
        } else {
            let text_for_store = error_text.clone();
            self.store
                .update(
                    &task.id,
                    Box::new(move |t| {
                        t.state = TaskState::Failed;
                        t.error = Some(text_for_store);
                        t.error_code = Some(error_code.to_string());
                        Ok(())
                    }),
                )
                .await?
        };
        self.cache.put(&updated).await;

        let failed_event = GatewayEvent::GenerationFailed {
            task_id: updated.id.clone(),
            error: error_text,
            error_code: error_code.to_string(),
            is_retryable: can_retry,
            retry_count,
            max_retries,
            next_retry_at: updated.next_retry_at,
            failed_at: Utc::now(),
            correlation_id: correlation_id.to_string(),
        };
        self.publish_best_effort(failed_event, &updated.id, "generation failed").await;

        if let Some(event) = webhooks::failure_event(&updated, can_retry) {
            self.publish_best_effort(event, &updated.id, "webhook delivery requested (failed)")
                .await;
        }

        Ok(())
    }
}

fn retry_policy(cfg: &RetryConfig) -> RetryPolicy {
    RetryPolicy {
        base: cfg.base(),
        max: cfg.max(),
        jitter_fraction: cfg.jitter_fraction,
    }
}
