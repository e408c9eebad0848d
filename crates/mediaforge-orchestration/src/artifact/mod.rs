//! Artifact Pipeline (spec §4.5): bounded-parallel per-artifact
//! post-processing — decode or download, persist to blob storage, emit a
//! `MediaGenerationCompleted` event, report progress.

pub mod storage;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::StreamExt;
use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::messaging::{GatewayEvent, MessageClient};
use mediaforge_shared::model::{ArtifactDescriptor, ArtifactSource, MediaArtifact, MediaType};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub use storage::{infer_content_type, ByteStream, MediaMetadata, MediaStorage, StoredMedia};

/// Per-call context shared by every artifact in one dispatch (spec §4.4
/// step 7 invokes the pipeline once per generation with this in hand).
#[derive(Debug, Clone)]
pub struct ArtifactContext {
    pub task_id: String,
    pub caller_credential_id: i64,
    pub provider_id: String,
    pub generator_model: String,
    pub prompt: String,
    pub correlation_id: String,
    pub media_type: MediaType,
    pub provider_concurrency_limit: usize,
    pub download_timeout: Duration,
}

pub struct ArtifactPipeline {
    http: reqwest::Client,
    storage: Arc<dyn MediaStorage>,
    events: Arc<MessageClient>,
}

impl ArtifactPipeline {
    pub fn new(http: reqwest::Client, storage: Arc<dyn MediaStorage>, events: Arc<MessageClient>) -> Self {
        Self {
            http,
            storage,
            events,
        }
    }

    /// Processes every descriptor with bounded concurrency
    /// `min(provider_limit, total_artifacts)` (spec §4.5 step 1), returning
    /// the results ordered by the provider's original artifact index
    /// regardless of completion order.
    pub async fn process(
        &self,
        artifacts: Vec<ArtifactDescriptor>,
        ctx: &ArtifactContext,
        cancellation: &CancellationToken,
        progress: &AtomicU32,
    ) -> Result<Vec<MediaArtifact>, GatewayError> {
        let total = artifacts.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let capacity = ctx.provider_concurrency_limit.min(total).max(1);
        let semaphore = Arc::new(Semaphore::new(capacity));

        let results = futures::future::join_all(artifacts.into_iter().map(|descriptor| {
            let semaphore = semaphore.clone();
            async move {
                // Held for the whole artifact; dropped on every exit path
                // (success, error, or early return), which releases the
                // semaphore unconditionally (spec §4.5 step 9).
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("artifact semaphore is never closed");
                if cancellation.is_cancelled() {
                    return Err(GatewayError::Cancelled);
                }
                let artifact = self.process_one(descriptor, ctx).await?;
                progress.fetch_add(1, Ordering::SeqCst);
                Ok(artifact)
            }
        }))
        .await;

        let mut out: Vec<MediaArtifact> = results.into_iter().collect::<Result<_, _>>()?;
        out.sort_by_key(|a| a.index);
        Ok(out)
    }

    async fn process_one(
        &self,
        descriptor: ArtifactDescriptor,
        ctx: &ArtifactContext,
    ) -> Result<MediaArtifact, GatewayError> {
        let (stored, content_type, original_url) = match &descriptor.source {
            ArtifactSource::InlineBase64(data) => {
                let stream = decode_base64_stream(data.clone());
                let content_type = ctx.media_type.default_content_type().to_string();
                let metadata = self.build_metadata(ctx, &descriptor, &content_type, None);
                let stored = self.storage.store(stream, metadata).await?;
                (stored, content_type, None)
            }
            ArtifactSource::Url(url) => self.fetch_and_store_url(url, &descriptor, ctx).await?,
        };

        self.emit_completed(ctx, &descriptor, &stored, &content_type, original_url.as_deref())
            .await;

        Ok(MediaArtifact {
            url: stored.url,
            content_type,
            size_bytes: stored.size_bytes,
            storage_key: stored.storage_key,
            generator_model: ctx.generator_model.clone(),
            prompt: ctx.prompt.clone(),
            index: descriptor.index,
        })
    }

    /// Spec §4.5 step 3: GET the provider URL with a per-provider timeout,
    /// stream straight into storage. Both a failed GET and a failed store
    /// fall back to the original URL — storage is best-effort for
    /// URL-sourced artifacts, so the task still succeeds pointing at the
    /// provider's own hosting.
    async fn fetch_and_store_url(
        &self,
        url: &str,
        descriptor: &ArtifactDescriptor,
        ctx: &ArtifactContext,
    ) -> Result<(StoredMedia, String, Option<String>), GatewayError> {
        let response = match self.http.get(url).timeout(ctx.download_timeout).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::warn!(url, status = %resp.status(), "artifact download returned non-2xx, keeping provider URL");
                return Ok(self.fallback_to_original_url(url, ctx));
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "artifact download failed, keeping provider URL");
                return Ok(self.fallback_to_original_url(url, ctx));
            }
        };

        let content_type = infer_content_type(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some(url),
            ctx.media_type.default_content_type(),
        );

        let byte_stream: ByteStream = Box::pin(response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| GatewayError::StorageTransient(format!("download stream error: {e}")))
        }));

        let metadata = self.build_metadata(ctx, descriptor, &content_type, Some(url.to_string()));
        match self.storage.store(byte_stream, metadata).await {
            Ok(stored) => Ok((stored, content_type, Some(url.to_string()))),
            Err(e) => {
                tracing::warn!(url, error = %e, "artifact storage failed, keeping provider URL");
                Ok(self.fallback_to_original_url(url, ctx))
            }
        }
    }

    fn fallback_to_original_url(
        &self,
        url: &str,
        ctx: &ArtifactContext,
    ) -> (StoredMedia, String, Option<String>) {
        let content_type =
            infer_content_type(None, Some(url), ctx.media_type.default_content_type());
        (
            StoredMedia {
                url: url.to_string(),
                storage_key: format!("external:{url}"),
                size_bytes: 0,
            },
            content_type,
            Some(url.to_string()),
        )
    }

    fn build_metadata(
        &self,
        ctx: &ArtifactContext,
        descriptor: &ArtifactDescriptor,
        content_type: &str,
        original_url: Option<String>,
    ) -> MediaMetadata {
        let ext = original_url
            .as_deref()
            .and_then(storage::extension_from_url)
            .unwrap_or_else(|| match ctx.media_type {
                MediaType::Image => "png".to_string(),
                MediaType::Video => "mp4".to_string(),
            });
        MediaMetadata {
            content_type: content_type.to_string(),
            filename: format!(
                "{}-{}-{}.{ext}",
                ctx.task_id,
                descriptor.index,
                chrono::Utc::now().timestamp_millis()
            ),
            creator_credential_id: ctx.caller_credential_id,
            prompt: ctx.prompt.clone(),
            generator_model: ctx.generator_model.clone(),
            provider_id: ctx.provider_id.clone(),
            original_url,
        }
    }

    async fn emit_completed(
        &self,
        ctx: &ArtifactContext,
        descriptor: &ArtifactDescriptor,
        stored: &StoredMedia,
        content_type: &str,
        original_url: Option<&str>,
    ) {
        let event = GatewayEvent::MediaGenerationCompleted {
            media_type: ctx.media_type,
            caller_credential_id: ctx.caller_credential_id,
            url: stored.url.clone(),
            storage_key: stored.storage_key.clone(),
            size_bytes: stored.size_bytes,
            content_type: content_type.to_string(),
            model: ctx.generator_model.clone(),
            prompt: ctx.prompt.clone(),
            generated_at: chrono::Utc::now(),
            metadata: serde_json::json!({
                "provider_id": ctx.provider_id,
                "original_url": original_url,
                "index": descriptor.index,
            }),
            correlation_id: ctx.correlation_id.clone(),
        };
        if let Err(e) = self.events.publish_event(event).await {
            tracing::warn!(task_id = %ctx.task_id, error = %e, "failed to publish media generation completed");
        }
    }
}

/// Decodes inline base64 in fixed-size chunks (a multiple of 4 so padding
/// never lands mid-chunk) without materializing the full decoded buffer
/// (spec §4.5 step 2) — each chunk is handed off as soon as it's decoded.
fn decode_base64_stream(data: String) -> ByteStream {
    const CHUNK_CHARS: usize = 4096;
    let stream = futures::stream::unfold((data, 0usize), |(data, pos)| async move {
        if pos >= data.len() {
            return None;
        }
        let end = (pos + CHUNK_CHARS).min(data.len());
        match STANDARD.decode(&data[pos..end]) {
            Ok(bytes) => Some((Ok(Bytes::from(bytes)), (data, end))),
            Err(e) => {
                let terminal_pos = data.len();
                Some((
                    Err(GatewayError::Validation(format!("invalid base64 artifact: {e}"))),
                    (data, terminal_pos),
                ))
            }
        }
    });
    Box::pin(stream)
}
