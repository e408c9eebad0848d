//! Shared harness for the root end-to-end tests: wires every orchestration
//! component together the way `mediaforge-worker` does, but against
//! in-memory backends so these tests never touch a socket or a database.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mediaforge_orchestration::{
    ArtifactPipeline, CancellableTaskRegistry, DiscoveryResolver, FlatRateCostCalculator,
    InMemoryTaskStore, MappingStore, Orchestrator, ProviderClient, ProviderClientFactory,
    ProviderStore, SharedTaskStatusCache, TaskStatusCache,
};
use mediaforge_orchestration::discovery::DiscoveryCache;
use mediaforge_orchestration::health::circuit_breaker::ProviderCircuitBreakerConfig;
use mediaforge_orchestration::health::monitor::ProviderHealthMonitor;
use mediaforge_orchestration::artifact::{ByteStream, MediaMetadata, MediaStorage, StoredMedia};
use mediaforge_orchestration::provider_client::{GenerationResult, UsageRecord};
use mediaforge_orchestration::testing::AllowAllCredentialValidator;
use mediaforge_shared::config::{
    ArtifactPipelineSettings, DiscoverySettings, HealthMonitorSettings, InvalidatorSettings,
    RetryConfig, TaskCacheSettings,
};
use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::messaging::{MessageClient, MessageRouterKind, MessagingProvider};
use mediaforge_shared::model::{
    Capability, GenerationRequest, ImageTaskMetadata, ModelMapping, ProviderCredential,
    ProviderDescriptor, ProviderType, ResponseFormat, Task, TaskMetadata, VideoTaskMetadata,
};

pub const PROVIDER_ID: &str = "demo-provider";
pub const MODEL_ALIAS: &str = "fast-image";

/// A provider client that counts every generate_image invocation and can be
/// told (via an atomic) to fail exactly once before it starts succeeding —
/// the transient-failure-then-retry scenario needs to observe both the
/// count and the eventual success.
#[derive(Debug)]
pub struct CountingProvider {
    pub calls: AtomicUsize,
    pub fail_next: AtomicBool,
}

impl CountingProvider {
    pub fn new(fail_next: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_next: AtomicBool::new(fail_next),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

const PLACEHOLDER_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=";

#[async_trait]
impl ProviderClient for CountingProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::ImageGeneration | Capability::VideoGeneration
        )
    }

    async fn generate_image(
        &self,
        _model_id: &str,
        request: &GenerationRequest,
        _cancellation: &tokio_util::sync::CancellationToken,
    ) -> Result<GenerationResult, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::ProviderTransient(
                "simulated transient upstream failure".into(),
            ));
        }
        let artifacts = (0..request.count.max(1))
            .map(|index| mediaforge_shared::model::ArtifactDescriptor {
                index,
                source: mediaforge_shared::model::ArtifactSource::InlineBase64(
                    PLACEHOLDER_PNG_BASE64.to_string(),
                ),
            })
            .collect();
        Ok(GenerationResult {
            artifacts,
            usage: UsageRecord::Images {
                count: request.count.max(1),
            },
        })
    }

    async fn health(&self) -> Result<Duration, GatewayError> {
        Ok(Duration::from_millis(1))
    }
}

struct CountingFactory(Arc<CountingProvider>);

impl ProviderClientFactory for CountingFactory {
    fn build(&self, _provider_id: &str) -> Result<Arc<dyn ProviderClient>, GatewayError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct InMemoryStorage;

#[async_trait]
impl MediaStorage for InMemoryStorage {
    async fn store(&self, mut stream: ByteStream, metadata: MediaMetadata) -> Result<StoredMedia, GatewayError> {
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(StoredMedia {
            url: format!("https://blob.example/{}", metadata.filename),
            storage_key: metadata.filename,
            size_bytes: buf.len() as u64,
        })
    }

    async fn get(&self, _storage_key: &str) -> Result<ByteStream, GatewayError> {
        unimplemented!("not exercised by these tests")
    }
}

pub fn image_request(count: u32) -> GenerationRequest {
    GenerationRequest {
        prompt: "a mountain at dusk".into(),
        model_alias: MODEL_ALIAS.into(),
        count,
        size: "1024x1024".into(),
        quality: None,
        style: None,
        response_format: ResponseFormat::Url,
        webhook_url: Some("https://example.com/hook".into()),
        webhook_headers: None,
        correlation_id: "corr-1".into(),
    }
}

pub fn image_task(id: &str, count: u32) -> Task {
    Task::new(
        id.into(),
        7,
        3,
        TaskMetadata::Image(ImageTaskMetadata {
            request: image_request(count),
            caller_credential_hash: "hash".into(),
            webhook_url: Some("https://example.com/hook".into()),
            webhook_headers: None,
        }),
    )
}

pub fn video_task(id: &str) -> Task {
    Task::new(
        id.into(),
        7,
        3,
        TaskMetadata::Video(VideoTaskMetadata {
            request: GenerationRequest {
                model_alias: MODEL_ALIAS.into(),
                ..image_request(1)
            },
            caller_credential_hash: "hash".into(),
            webhook_url: Some("https://example.com/hook".into()),
            webhook_headers: None,
            last_progress_cursor: None,
        }),
    )
}

/// Everything an end-to-end test needs direct access to: the orchestrator
/// under test plus the collaborators it was built from, so assertions can
/// reach past the orchestrator's own API (store state, published events,
/// the provider's call count, the health monitor's breaker).
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<InMemoryTaskStore>,
    pub events: Arc<MessageClient>,
    pub provider: Arc<CountingProvider>,
    pub health: Arc<ProviderHealthMonitor>,
    pub cache: SharedTaskStatusCache,
}

/// `fail_next` seeds the stub provider to fail exactly the first dispatch
/// attempt; `cb_failure_threshold` lets the circuit-breaker test open the
/// breaker after a single recorded failure instead of the production
/// default of five.
pub fn build_harness(fail_next: bool, cb_failure_threshold: u64) -> Harness {
    let store = Arc::new(InMemoryTaskStore::new());
    let cache: SharedTaskStatusCache = Arc::new(TaskStatusCache::new(&TaskCacheSettings::default()));
    let registry = Arc::new(CancellableTaskRegistry::new());

    let mappings = Arc::new(MappingStore::new());
    mappings.insert(ModelMapping {
        alias: MODEL_ALIAS.into(),
        provider_id: PROVIDER_ID.into(),
        provider_model_id: "m1".into(),
        supports_image_generation: true,
        supports_video_generation: true,
        supports_vision: false,
    });
    let providers = Arc::new(ProviderStore::new());
    providers.insert(ProviderDescriptor {
        id: PROVIDER_ID.into(),
        provider_type: ProviderType::Custom,
        enabled: true,
        credentials: vec![ProviderCredential {
            is_primary: true,
            is_enabled: true,
            api_key: "k".into(),
        }],
    });
    let discovery_cache = Arc::new(DiscoveryCache::new(&DiscoverySettings::default()));
    let discovery = Arc::new(DiscoveryResolver::new(
        mappings,
        providers,
        discovery_cache,
        Arc::new(AllowAllCredentialValidator),
        &DiscoverySettings::default(),
    ));

    let events = Arc::new(MessageClient::new(
        Arc::new(MessagingProvider::new_in_memory()),
        MessageRouterKind::default(),
    ));

    let provider = Arc::new(CountingProvider::new(fail_next));
    let health = Arc::new(ProviderHealthMonitor::new(
        HealthMonitorSettings::default(),
        ProviderCircuitBreakerConfig {
            failure_threshold: cb_failure_threshold,
            recovery_timeout_seconds: 3600,
            success_threshold: 1,
        },
        events.clone(),
    ));
    health.register(provider.clone());

    let artifact_pipeline = Arc::new(ArtifactPipeline::new(
        reqwest::Client::new(),
        Arc::new(InMemoryStorage),
        events.clone(),
    ));

    let mut image_retry = RetryConfig::default();
    image_retry.base_delay_seconds = 0;
    let video_retry = image_retry;

    let orchestrator = Orchestrator::new(
        store.clone(),
        cache.clone(),
        registry,
        discovery,
        health.clone(),
        Arc::new(CountingFactory(provider.clone())),
        artifact_pipeline,
        Arc::new(FlatRateCostCalculator::default()),
        events.clone(),
        image_retry,
        video_retry,
        ArtifactPipelineSettings::default(),
    );

    Harness {
        orchestrator,
        store,
        events,
        provider,
        health,
        cache,
    }
}

pub fn invalidator_settings() -> InvalidatorSettings {
    InvalidatorSettings {
        enabled: true,
        flush_window_millis: 50,
        max_batch_size: 500,
        coalesce: true,
    }
}
