//! The provider client contract (spec §9 "polymorphism over a capability
//! set", replacing the source's reflective `CreateVideoAsync` method
//! discovery and decorator unwrapping). A provider client is polymorphic
//! over `{GenerateImage, GenerateVideo, ListModels, Health}`; not every
//! provider implements every capability, so callers probe `supports`
//! before calling rather than reflecting on the concrete type.
//!
//! Concrete provider HTTP clients are out of scope for this core (spec §1);
//! only this contract is consumed. Tests and the worker binary's default
//! wiring use the stub implementation in `mediaforge-orchestration::testing`.

use std::time::Duration;

use async_trait::async_trait;
use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::model::{ArtifactDescriptor, Capability};

/// One generated artifact as returned by an upstream provider call, before
/// the Artifact Pipeline post-processes it.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub artifacts: Vec<ArtifactDescriptor>,
    /// Cost usage basis: image count for image generation, or
    /// `duration_seconds` for video (resolution is read from the request).
    pub usage: UsageRecord,
}

#[derive(Debug, Clone)]
pub enum UsageRecord {
    Images { count: u32 },
    Video { duration_seconds: f64, resolution: String },
}

/// A single progress update pushed by a provider that supports streaming
/// progress (spec §4.4(a)); providers without push support are polled
/// instead, which does not go through this type.
#[derive(Debug, Clone)]
pub struct ProviderProgressUpdate {
    pub completed: u32,
    pub total: u32,
    pub message: Option<String>,
}

/// Polymorphism over a capability set: the single interface every provider
/// client implements, probing `supports` rather than being reflected on.
#[async_trait]
pub trait ProviderClient: Send + Sync + std::fmt::Debug {
    fn provider_id(&self) -> &str;

    fn supports(&self, capability: Capability) -> bool;

    /// Whether `generate_video` actually invokes its `on_progress` callback.
    /// Providers that don't are polled by the orchestrator instead (spec
    /// §4.4(b)).
    fn supports_push_progress(&self) -> bool {
        false
    }

    async fn generate_image(
        &self,
        model_id: &str,
        request: &mediaforge_shared::model::GenerationRequest,
        cancellation: &tokio_util::sync::CancellationToken,
    ) -> Result<GenerationResult, GatewayError> {
        let _ = (model_id, request, cancellation);
        Err(GatewayError::UnsupportedCapability(format!(
            "{} does not implement generate_image",
            self.provider_id()
        )))
    }

    async fn generate_video(
        &self,
        model_id: &str,
        request: &mediaforge_shared::model::GenerationRequest,
        cancellation: &tokio_util::sync::CancellationToken,
        on_progress: Option<&(dyn Fn(ProviderProgressUpdate) + Send + Sync)>,
    ) -> Result<GenerationResult, GatewayError> {
        let _ = (model_id, request, cancellation, on_progress);
        Err(GatewayError::UnsupportedCapability(format!(
            "{} does not implement generate_video",
            self.provider_id()
        )))
    }

    async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        Err(GatewayError::UnsupportedCapability(format!(
            "{} does not implement list_models",
            self.provider_id()
        )))
    }

    /// A cheap liveness probe (spec §4.6); returns the measured response
    /// time on success.
    async fn health(&self) -> Result<Duration, GatewayError>;
}

/// Constructs a `ProviderClient` for a given provider id, transparently
/// injecting credentials (spec §4.4 step 4). The concrete construction
/// logic (HTTP client setup, credential lookup) is an external collaborator;
/// this trait only names the seam the orchestrator dispatches through.
pub trait ProviderClientFactory: Send + Sync {
    fn build(&self, provider_id: &str) -> Result<std::sync::Arc<dyn ProviderClient>, GatewayError>;
}
