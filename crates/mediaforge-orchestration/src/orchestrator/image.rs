//! Image flavor dispatch (spec §4.4(a)): a single upstream request/response
//! call, no push progress — the Artifact Pipeline's own counter is the only
//! progress signal during an image dispatch. Shares the common sequencing
//! (register, transition, resolve, invoke, pipeline, finish) implemented on
//! `Orchestrator` in `mod.rs`; this file only differs in how the upstream
//! call itself is shaped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::model::{Capability, GenerationRequest, MediaType, Task};

use super::progress::ProgressReporter;
use super::{Orchestrator, UnregisterGuard};
use crate::artifact::ArtifactContext;
use crate::provider_client::{GenerationResult, ProviderClient};

pub(crate) async fn invoke(
    provider: &Arc<dyn ProviderClient>,
    model_id: &str,
    request: &GenerationRequest,
    cancellation: &tokio_util::sync::CancellationToken,
) -> Result<GenerationResult, GatewayError> {
    provider.generate_image(model_id, request, cancellation).await
}

impl Orchestrator {
    pub(crate) async fn run_image(&self, task: Task, correlation_id: &str) -> Result<(), GatewayError> {
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
            .resolve(task.owner_key_id, &request.model_alias, Capability::ImageGeneration)
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

        let gen_result = match invoke(&provider, &resolved.provider_model_id, &request, &token).await {
            Ok(r) => r,
            Err(e) => return self.finish_failed_or_retry(task, correlation_id, e).await,
        };

        let reporter = ProgressReporter::spawn(
            self.events.clone(),
            task.id.clone(),
            correlation_id.to_string(),
            request.count,
        );
        let ctx = ArtifactContext {
            task_id: task.id.clone(),
            caller_credential_id: task.owner_key_id,
            provider_id: resolved.provider_id.clone(),
            generator_model: resolved.provider_model_id.clone(),
            prompt: request.prompt.clone(),
            correlation_id: correlation_id.to_string(),
            media_type: MediaType::Image,
            provider_concurrency_limit: self.artifact_settings.default_provider_concurrency,
            download_timeout: Duration::from_secs(self.artifact_settings.download_timeout_seconds),
        };
        let counter = reporter.counter();
        let artifact_result = self
            .artifact_pipeline
            .process(gen_result.artifacts, &ctx, &token, &counter)
            .await;
        reporter.stop().await;

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
