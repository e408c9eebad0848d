//! Discovery & Capability Resolver (spec §4.8): translates
//! `(caller_credential, requested_model_alias)` into a validated
//! `(provider_id, provider_model_id, capabilities)` triple, and a background
//! flow that refreshes the known model set per provider.

pub mod cache;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use mediaforge_shared::config::DiscoverySettings;
use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::model::{Capability, ModelMapping, ProviderDescriptor};
use moka::future::Cache;

pub use cache::{
    discovery_key_capability, discovery_key_provider, provider_capability_key, DiscoveredModel,
    DiscoveryCache,
};
pub use service::ModelDiscoveryService;

/// The resolved `(provider_id, provider_model_id, capabilities)` triple
/// (spec §4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub provider_id: String,
    pub provider_model_id: String,
    pub capabilities: Vec<Capability>,
}

/// Validates a caller credential against the requested alias (spec §1:
/// "authentication of virtual keys — only its validation interface is
/// consumed"). The concrete check (credential lookup, per-caller policy) is
/// an external collaborator; this is only the seam the resolver dispatches
/// through.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, caller_credential_id: i64, alias: &str) -> Result<(), GatewayError>;
}

/// Explicit model-mapping store: a `DashMap` seeded at startup (spec §4.8
/// "supplemented" — a real deployment backs this with the Postgres store,
/// but it's read-mostly reference data out of this core's persistence
/// scope).
#[derive(Default)]
pub struct MappingStore {
    mappings: DashMap<String, ModelMapping>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, mapping: ModelMapping) {
        self.mappings.insert(mapping.alias.clone(), mapping);
    }

    pub fn get(&self, alias: &str) -> Option<ModelMapping> {
        self.mappings.get(alias).map(|m| m.clone())
    }
}

/// Provider descriptor store, seeded the same way as `MappingStore`.
#[derive(Default)]
pub struct ProviderStore {
    providers: DashMap<String, ProviderDescriptor>,
}

impl ProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, descriptor: ProviderDescriptor) {
        self.providers.insert(descriptor.id.clone(), descriptor);
    }

    pub fn get(&self, id: &str) -> Option<ProviderDescriptor> {
        self.providers.get(id).map(|p| p.clone())
    }

    pub fn all(&self) -> Vec<ProviderDescriptor> {
        self.providers.iter().map(|e| e.value().clone()).collect()
    }
}

pub struct DiscoveryResolver {
    mappings: Arc<MappingStore>,
    providers: Arc<ProviderStore>,
    discovery_cache: Arc<DiscoveryCache>,
    credential_validator: Arc<dyn CredentialValidator>,
    /// Read-through cache for "is this provider enabled and does it carry
    /// an enabled credential for this capability" (spec §6's
    /// `provider_capabilities_<id>_<type>` key). Invalidated by the
    /// `ProviderCapabilities` cache family (spec §4.7) whenever a
    /// provider's credentials or enabled state change.
    capability_availability: Cache<String, bool>,
}

impl DiscoveryResolver {
    pub fn new(
        mappings: Arc<MappingStore>,
        providers: Arc<ProviderStore>,
        discovery_cache: Arc<DiscoveryCache>,
        credential_validator: Arc<dyn CredentialValidator>,
        settings: &DiscoverySettings,
    ) -> Self {
        Self {
            mappings,
            providers,
            discovery_cache,
            credential_validator,
            capability_availability: Cache::builder()
                .time_to_live(Duration::from_secs(settings.capability_cache_ttl_seconds))
                .build(),
        }
    }

    /// Drops the cached availability verdict for `(provider_id,
    /// capability)`, forcing the next `resolve` call to re-check the
    /// provider store. The Batched Cache Invalidator calls this when it
    /// flushes a `ProviderCapabilities` invalidation request.
    pub async fn invalidate_capability_availability(&self, provider_id: &str, capability: Capability) {
        self.capability_availability
            .invalidate(&provider_capability_key(provider_id, capability))
            .await;
    }

    /// Spec §4.8 steps 1-5.
    pub async fn resolve(
        &self,
        caller_credential_id: i64,
        alias: &str,
        capability: Capability,
    ) -> Result<ResolvedModel, GatewayError> {
        self.credential_validator
            .validate(caller_credential_id, alias)
            .await?;

        let (provider_id, provider_model_id, capabilities) =
            match self.mappings.get(alias) {
                Some(mapping) => {
                    if !mapping.supports(capability) {
                        return Err(GatewayError::UnsupportedCapability(format!(
                            "alias {alias} does not support {capability:?}"
                        )));
                    }
                    let mut caps = Vec::new();
                    if mapping.supports_image_generation {
                        caps.push(Capability::ImageGeneration);
                    }
                    if mapping.supports_video_generation {
                        caps.push(Capability::VideoGeneration);
                    }
                    if mapping.supports_vision {
                        caps.push(Capability::Vision);
                    }
                    (mapping.provider_id, mapping.provider_model_id, caps)
                }
                None => self.resolve_from_discovery_cache(alias, capability).await?,
            };

        if !self.provider_capable(&provider_id, capability).await {
            return Err(GatewayError::ProviderUnavailable(provider_id));
        }

        Ok(ResolvedModel {
            provider_id,
            provider_model_id,
            capabilities,
        })
    }

    /// Whether `provider_id` is enabled and currently carries an enabled
    /// credential, read-through cached per `(provider_id, capability)`.
    async fn provider_capable(&self, provider_id: &str, capability: Capability) -> bool {
        let key = provider_capability_key(provider_id, capability);
        if let Some(cached) = self.capability_availability.get(&key).await {
            return cached;
        }
        let available = self
            .providers
            .get(provider_id)
            .is_some_and(|d| d.enabled && d.has_enabled_credential());
        self.capability_availability.insert(key, available).await;
        available
    }

    /// Consulted only when `alias` is absent from the explicit mapping
    /// store (spec §4.8's last sentence). Looks the alias up as a
    /// provider-native model id discovered by the background flow.
    async fn resolve_from_discovery_cache(
        &self,
        alias: &str,
        capability: Capability,
    ) -> Result<(String, String, Vec<Capability>), GatewayError> {
        if let Some((provider_id, model)) = self
            .discovery_cache
            .find_capable_model(alias, capability)
            .await
        {
            return Ok((provider_id, model.provider_model_id, model.capabilities));
        }
        Err(GatewayError::ModelNotFound(alias.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaforge_shared::config::DiscoverySettings;
    use mediaforge_shared::model::ProviderCredential;
    use mediaforge_shared::model::ProviderType;

    struct AlwaysAllow;

    #[async_trait]
    impl CredentialValidator for AlwaysAllow {
        async fn validate(&self, _id: i64, _alias: &str) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    struct AlwaysDeny;

    #[async_trait]
    impl CredentialValidator for AlwaysDeny {
        async fn validate(&self, _id: i64, _alias: &str) -> Result<(), GatewayError> {
            Err(GatewayError::Authorization("denied".into()))
        }
    }

    fn provider(id: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            id: id.into(),
            provider_type: ProviderType::OpenAiCompatible,
            enabled: true,
            credentials: vec![ProviderCredential {
                is_primary: true,
                is_enabled: true,
                api_key: "k".into(),
            }],
        }
    }

    fn resolver(validator: Arc<dyn CredentialValidator>) -> DiscoveryResolver {
        let mappings = Arc::new(MappingStore::new());
        mappings.insert(ModelMapping {
            alias: "fast-image".into(),
            provider_id: "p1".into(),
            provider_model_id: "m1".into(),
            supports_image_generation: true,
            supports_video_generation: false,
            supports_vision: false,
        });
        let providers = Arc::new(ProviderStore::new());
        providers.insert(provider("p1"));
        let discovery_cache = Arc::new(DiscoveryCache::new(&DiscoverySettings::default()));
        DiscoveryResolver::new(
            mappings,
            providers,
            discovery_cache,
            validator,
            &DiscoverySettings::default(),
        )
    }

    #[tokio::test]
    async fn resolves_known_alias() {
        let r = resolver(Arc::new(AlwaysAllow));
        let result = r
            .resolve(1, "fast-image", Capability::ImageGeneration)
            .await
            .unwrap();
        assert_eq!(result.provider_id, "p1");
        assert_eq!(result.provider_model_id, "m1");
    }

    #[tokio::test]
    async fn rejects_disallowed_credential() {
        let r = resolver(Arc::new(AlwaysDeny));
        let result = r
            .resolve(1, "fast-image", Capability::ImageGeneration)
            .await;
        assert!(matches!(result, Err(GatewayError::Authorization(_))));
    }

    #[tokio::test]
    async fn unknown_alias_is_model_not_found() {
        let r = resolver(Arc::new(AlwaysAllow));
        let result = r
            .resolve(1, "missing-alias", Capability::ImageGeneration)
            .await;
        assert!(matches!(result, Err(GatewayError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn unsupported_capability_is_rejected() {
        let r = resolver(Arc::new(AlwaysAllow));
        let result = r
            .resolve(1, "fast-image", Capability::VideoGeneration)
            .await;
        assert!(matches!(result, Err(GatewayError::UnsupportedCapability(_))));
    }

    #[tokio::test]
    async fn disabled_provider_is_unavailable() {
        let mappings = Arc::new(MappingStore::new());
        mappings.insert(ModelMapping {
            alias: "fast-image".into(),
            provider_id: "p1".into(),
            provider_model_id: "m1".into(),
            supports_image_generation: true,
            supports_video_generation: false,
            supports_vision: false,
        });
        let providers = Arc::new(ProviderStore::new());
        let mut disabled = provider("p1");
        disabled.enabled = false;
        providers.insert(disabled);
        let discovery_cache = Arc::new(DiscoveryCache::new(&DiscoverySettings::default()));
        let r = DiscoveryResolver::new(
            mappings,
            providers,
            discovery_cache,
            Arc::new(AlwaysAllow),
            &DiscoverySettings::default(),
        );

        let result = r
            .resolve(1, "fast-image", Capability::ImageGeneration)
            .await;
        assert!(matches!(result, Err(GatewayError::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn capability_availability_is_cached_until_explicitly_invalidated() {
        let r = resolver(Arc::new(AlwaysAllow));
        r.resolve(1, "fast-image", Capability::ImageGeneration)
            .await
            .unwrap();
        assert!(
            r.capability_availability
                .get(&provider_capability_key("p1", Capability::ImageGeneration))
                .await
                .unwrap()
        );

        r.invalidate_capability_availability("p1", Capability::ImageGeneration)
            .await;
        assert!(
            r.capability_availability
                .get(&provider_capability_key("p1", Capability::ImageGeneration))
                .await
                .is_none()
        );
    }
}
