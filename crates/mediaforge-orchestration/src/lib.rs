//! Orchestration core business logic: task store, task status cache,
//! cancellable task registry, the orchestrator itself, the artifact
//! pipeline, the provider health monitor, the batched cache invalidator,
//! and the discovery & capability resolver. Built on the cross-cutting
//! primitives in `mediaforge_shared`.

pub mod artifact;
pub mod cache;
pub mod discovery;
pub mod health;
pub mod invalidator;
pub mod orchestrator;
pub mod provider_client;
pub mod registry;
pub mod store;
pub mod testing;

pub use artifact::{ArtifactContext, ArtifactPipeline, MediaStorage};
pub use cache::{SharedTaskStatusCache, TaskStatusCache};
pub use discovery::{CredentialValidator, DiscoveryResolver, MappingStore, ProviderStore, ResolvedModel};
pub use invalidator::{BatchedCacheInvalidator, CoreInvalidationTarget, InvalidationTarget, InvalidatorSnapshot};
pub use orchestrator::{CostCalculator, FlatRateCostCalculator, Orchestrator};
pub use provider_client::{
    GenerationResult, ProviderClient, ProviderClientFactory, ProviderProgressUpdate, UsageRecord,
};
pub use registry::{CancellableTaskRegistry, CancellationHandle};
pub use store::{InMemoryTaskStore, PgTaskStore, TaskMutator, TaskStore};
