//! The 24h discovery cache (spec §4.8, keying scheme in spec §6):
//! `discovery_cache:provider:<name>` holds the models discovered for one
//! provider; `discovery_cache:capability:<model>:<cap>` indexes straight to
//! the `(provider_id, model)` pair that satisfies a given capability, so the
//! resolver's fallback lookup doesn't need to scan every provider's list.

use std::time::Duration;

use mediaforge_shared::config::DiscoverySettings;
use mediaforge_shared::model::Capability;
use moka::future::Cache;

pub fn discovery_key_provider(provider_id: &str) -> String {
    format!("discovery_cache:provider:{provider_id}")
}

pub fn discovery_key_capability(model: &str, capability: Capability) -> String {
    format!("discovery_cache:capability:{model}:{capability:?}")
}

/// The resolver's own read-through cache key (spec §6): whether
/// `provider_id` is currently enabled and carries an enabled credential for
/// `capability`, so `DiscoveryResolver::resolve` doesn't re-walk the
/// provider store on every call.
pub fn provider_capability_key(provider_id: &str, capability: Capability) -> String {
    format!("provider_capabilities_{provider_id}_{capability:?}")
}

/// One model discovered via a provider's catalog endpoint (or baked-in
/// defaults, for providers without one). Capabilities are approximated as
/// the set the provider client itself reports supporting — the catalog
/// endpoint's response doesn't carry per-model capability flags, only ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModel {
    pub provider_model_id: String,
    pub capabilities: Vec<Capability>,
}

pub struct DiscoveryCache {
    by_provider: Cache<String, Vec<DiscoveredModel>>,
    by_capability: Cache<String, (String, String)>,
}

impl DiscoveryCache {
    pub fn new(settings: &DiscoverySettings) -> Self {
        let ttl = Duration::from_secs(settings.capability_cache_ttl_seconds);
        Self {
            by_provider: Cache::builder().time_to_live(ttl).build(),
            by_capability: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Replaces the discovered set for `provider_id` and rebuilds the
    /// capability index entries pointing at it.
    pub async fn put_provider_models(&self, provider_id: &str, models: Vec<DiscoveredModel>) {
        for model in &models {
            for capability in &model.capabilities {
                self.by_capability
                    .insert(
                        discovery_key_capability(&model.provider_model_id, *capability),
                        (provider_id.to_string(), model.provider_model_id.clone()),
                    )
                    .await;
            }
        }
        self.by_provider
            .insert(discovery_key_provider(provider_id), models)
            .await;
    }

    pub async fn provider_models(&self, provider_id: &str) -> Option<Vec<DiscoveredModel>> {
        self.by_provider.get(&discovery_key_provider(provider_id)).await
    }

    /// Resolver fallback: find `(provider_id, model)` satisfying `capability`
    /// for a model id equal to `alias`.
    pub async fn find_capable_model(
        &self,
        alias: &str,
        capability: Capability,
    ) -> Option<(String, DiscoveredModel)> {
        let (provider_id, model_id) = self
            .by_capability
            .get(&discovery_key_capability(alias, capability))
            .await?;
        let models = self.provider_models(&provider_id).await?;
        let model = models
            .into_iter()
            .find(|m| m.provider_model_id == model_id)?;
        Some((provider_id, model))
    }
}
