//! Video flavor dispatch (spec §4.4(b)): providers that push progress drive
//! the shared reporter's counter directly through a callback; providers
//! that don't are polled by the orchestrator itself at increasing
//! intervals, capped at one minute, for the duration of the (typically
//! much longer) upstream call. Video also uses a distinct, more
//! conservative retry configuration (see `Orchestrator::finish_failed_or_retry`).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::model::{Capability, GenerationRequest, MediaType, Task};

use super::progress::ProgressReporter;
use super::{Orchestrator, UnregisterGuard};
use crate::artifact::ArtifactContext;
use crate::provider_client::{GenerationResult, ProviderClient, ProviderProgressUpdate};

const INITIAL_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) async fn invoke(
    provider: &Arc<dyn ProviderClient>,
    model_id: &str,
    request: &GenerationRequest,
    cancellation: &tokio_util::sync::CancellationToken,
    reporter: &ProgressReporter,
) -> Result<GenerationResult, GatewayError> {
    if provider.supports_push_progress() {
        let counter = reporter.counter();
        let callback = move |update: ProviderProgressUpdate| {
            counter.fetch_max(update.completed, Ordering::SeqCst);
        };
        return provider
            .generate_video(model_id, request, cancellation, Some(&callback))
            .await;
    }

    let upstream = provider.generate_video(model_id, request, cancellation, None);
    tokio::pin!(upstream);
    let mut interval = INITIAL_POLL_INTERVAL;
    loop {
        tokio::select! {
            result = &mut upstream => return result,
            _ = tokio::time::sleep(interval) => {
                reporter.ping("still processing").await;
                interval = (interval * 2).min(MAX_POLL_INTERVAL);
            }
        }
    }
}

impl Orchestrator {
    pub(crate) async fn run_video(&self, task: Task, correlation_id: &str) -> Result<(), GatewayError> {
        let attempt_start = Instant::now();
        let handle = self.registry.register(&task.id);
        let _guard = UnregisterGuard {
            registry: self.registry.clone(),
            task_id: task.id.clone(),
        };
        let token = handle.token();

        let task = self.transition_processing(&task.id).await?;
        let request = task.metadata.request().clone();

        let resolved = match self
            .discovery
            .resolve(task.owner_key_id, &request.model_alias, Capability::VideoGeneration)
            .await
        {
            Ok(r) => r,
            Err(e) => return self.finish_failed_or_retry(task, correlation_id, e).await,
        };

        let provider = match self.provider_factory.build(&resolved.provider_id) {
            Ok(p) => p,
            Err(e) => return self.finish_failed_or_retry(task, correlation_id, e).await,
        };

        if let Some(cb) = self.health.circuit_breaker(&resolved.provider_id) {
            if cb.is_open() {
                let err = GatewayError::CircuitOpen(format!(
                    "circuit open for provider {}",
                    resolved.provider_id
                ));
                return self.finish_failed_or_retry(task, correlation_id, err).await;
            }
        }

        if let Err(msg) = request.validate() {
            return self
                .finish_failed_or_retry(task, correlation_id, GatewayError::Validation(msg))
                .await;
        }

        self.emit_started(&task, &resolved.provider_id, correlation_id).await;

        if token.is_cancelled() {
            return self
                .finish_failed_or_retry(task, correlation_id, GatewayError::Cancelled)
                .await;
        }

        let generation_reporter = ProgressReporter::spawn(
            self.events.clone(),
            task.id.clone(),
            correlation_id.to_string(),
            request.count.max(1),
        );
        let gen_result = invoke(
            &provider,
            &resolved.provider_model_id,
            &request,
            &token,
            &generation_reporter,
        )
        .await;
        generation_reporter.stop().await;
        let gen_result = match gen_result {
            Ok(r) => r,
            Err(e) => return self.finish_failed_or_retry(task, correlation_id, e).await,
        };

        let artifact_reporter = ProgressReporter::spawn(
            self.events.clone(),
            task.id.clone(),
            correlation_id.to_string(),
            request.count.max(1),
        );
        let ctx = ArtifactContext {
            task_id: task.id.clone(),
            caller_credential_id: task.owner_key_id,
            provider_id: resolved.provider_id.clone(),
            generator_model: resolved.provider_model_id.clone(),
            prompt: request.prompt.clone(),
            correlation_id: correlation_id.to_string(),
            media_type: MediaType::Video,
            provider_concurrency_limit: self.artifact_settings.default_provider_concurrency,
            download_timeout: Duration::from_secs(self.artifact_settings.download_timeout_seconds),
        };
        let counter = artifact_reporter.counter();
        let artifact_result = self
            .artifact_pipeline
            .process(gen_result.artifacts, &ctx, &token, &counter)
            .await;
        artifact_reporter.stop().await;

        let artifacts = match artifact_result {
            Ok(a) => a,
            Err(e) => return self.finish_failed_or_retry(task, correlation_id, e).await,
        };

        self.finish_completed(
            task,
            correlation_id,
            &resolved.provider_id,
            &resolved.provider_model_id,
            artifacts,
            &gen_result.usage,
            attempt_start,
        )
        .await
    }
}
