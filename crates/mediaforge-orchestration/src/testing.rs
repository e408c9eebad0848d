//! Stand-in implementations for the external collaborators this core only
//! names a seam for (concrete provider HTTP clients, the durable credential
//! validator, a production blob store — all out of scope per spec §1).
//! Used by the integration tests throughout this crate and, by default, by
//! the worker binary, so `mediaforge-worker` is runnable standalone without
//! a real provider account or object store wired in. A deployment wires its
//! own `ProviderClientFactory`, `CredentialValidator`, and `MediaStorage`
//! through the same seams and never needs to touch the orchestrator itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::model::{ArtifactDescriptor, ArtifactSource, Capability, GenerationRequest};

use crate::artifact::{ByteStream, MediaMetadata, MediaStorage, StoredMedia};
use crate::provider_client::{GenerationResult, ProviderClient, ProviderClientFactory, UsageRecord};

/// Always approves. A real deployment validates against its own virtual-key
/// store (spec §1's "authentication of virtual keys" collaborator).
#[derive(Debug, Default)]
pub struct AllowAllCredentialValidator;

#[async_trait]
impl crate::discovery::CredentialValidator for AllowAllCredentialValidator {
    async fn validate(&self, _caller_credential_id: i64, _alias: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// A provider client that fabricates artifacts instead of calling an
/// upstream API — every image/video request succeeds immediately with a
/// single inline-base64 1x1 placeholder, at the usage the request implies.
#[derive(Debug)]
pub struct StubProviderClient {
    id: String,
}

impl StubProviderClient {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

const PLACEHOLDER_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=";

#[async_trait]
impl ProviderClient for StubProviderClient {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::ImageGeneration | Capability::VideoGeneration | Capability::ListModels
        )
    }

    async fn generate_image(
        &self,
        _model_id: &str,
        request: &GenerationRequest,
        _cancellation: &tokio_util::sync::CancellationToken,
    ) -> Result<GenerationResult, GatewayError> {
        let artifacts = (0..request.count.max(1))
            .map(|index| ArtifactDescriptor {
                index,
                source: ArtifactSource::InlineBase64(PLACEHOLDER_PNG_BASE64.to_string()),
            })
            .collect();
        Ok(GenerationResult {
            artifacts,
            usage: UsageRecord::Images {
                count: request.count.max(1),
            },
        })
    }

    async fn generate_video(
        &self,
        _model_id: &str,
        request: &GenerationRequest,
        _cancellation: &tokio_util::sync::CancellationToken,
        on_progress: Option<&(dyn Fn(crate::provider_client::ProviderProgressUpdate) + Send + Sync)>,
    ) -> Result<GenerationResult, GatewayError> {
        if let Some(cb) = on_progress {
            cb(crate::provider_client::ProviderProgressUpdate {
                completed: request.count.max(1),
                total: request.count.max(1),
                message: Some("stub generation complete".to_string()),
            });
        }
        Ok(GenerationResult {
            artifacts: vec![ArtifactDescriptor {
                index: 0,
                source: ArtifactSource::InlineBase64(PLACEHOLDER_PNG_BASE64.to_string()),
            }],
            usage: UsageRecord::Video {
                duration_seconds: 4.0,
                resolution: "1280x720".to_string(),
            },
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        Ok(vec!["stub-fast".to_string()])
    }

    async fn health(&self) -> Result<Duration, GatewayError> {
        Ok(Duration::from_millis(1))
    }
}

/// Builds a `StubProviderClient` for any provider id asked of it — stands
/// in for the credential-aware HTTP client construction a real deployment
/// performs at this seam (spec §4.4 step 4).
#[derive(Debug, Default)]
pub struct StubProviderClientFactory;

impl ProviderClientFactory for StubProviderClientFactory {
    fn build(&self, provider_id: &str) -> Result<Arc<dyn ProviderClient>, GatewayError> {
        Ok(Arc::new(StubProviderClient::new(provider_id)))
    }
}

/// Process-local blob store keyed by storage key. Stands in for the object
/// store (S3-compatible or otherwise) the Artifact Pipeline's `MediaStorage`
/// contract names but does not itself provide (spec §1).
#[derive(Debug, Default)]
pub struct InMemoryMediaStorage {
    objects: DashMap<String, Vec<u8>>,
    next_id: AtomicU64,
}

#[async_trait]
impl MediaStorage for InMemoryMediaStorage {
    async fn store(&self, mut stream: ByteStream, metadata: MediaMetadata) -> Result<StoredMedia, GatewayError> {
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let key = format!("mem-{id}-{}", metadata.filename);
        let size = buf.len() as u64;
        self.objects.insert(key.clone(), buf);
        Ok(StoredMedia {
            url: format!("mem://{key}"),
            storage_key: key,
            size_bytes: size,
        })
    }

    async fn get(&self, storage_key: &str) -> Result<ByteStream, GatewayError> {
        let bytes = self
            .objects
            .get(storage_key)
            .map(|b| b.clone())
            .ok_or_else(|| GatewayError::StoragePermanent(format!("no such object: {storage_key}")))?;
        let item: Result<bytes::Bytes, GatewayError> = Ok(bytes::Bytes::from(bytes));
        Ok(Box::pin(futures::stream::iter(std::iter::once(item))))
    }
}
