//! Background model discovery (spec §4.8's "separate background flow"):
//! periodically calls each provider's catalog endpoint (`list_models`, per
//! the `ProviderClient` contract) and refreshes the discovery cache,
//! publishing `ModelCapabilitiesDiscovered` only when the discovered set for
//! a provider actually changed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mediaforge_shared::config::DiscoverySettings;
use mediaforge_shared::messaging::{GatewayEvent, MessageClient};
use mediaforge_shared::model::Capability;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::cache::{DiscoveredModel, DiscoveryCache};
use crate::provider_client::ProviderClient;

/// The capabilities a provider might expose a catalog for. Providers that
/// support neither are skipped entirely (spec §4.6's health-probe loop
/// applies the same filter for the same reason).
const DISCOVERABLE: [Capability; 2] = [Capability::ImageGeneration, Capability::VideoGeneration];

pub struct ModelDiscoveryService {
    clients: DashMap<String, Arc<dyn ProviderClient>>,
    discovery_cache: Arc<DiscoveryCache>,
    settings: DiscoverySettings,
    events: Arc<MessageClient>,
}

impl ModelDiscoveryService {
    pub fn new(
        discovery_cache: Arc<DiscoveryCache>,
        settings: DiscoverySettings,
        events: Arc<MessageClient>,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            discovery_cache,
            settings,
            events,
        }
    }

    pub fn register(&self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.provider_id().to_string(), client);
    }

    /// Runs until cancelled; intended to be spawned as one background task.
    /// The refresh period is the cache TTL itself, so the cache never goes
    /// fully cold between refreshes.
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.settings.capability_cache_ttl_seconds));
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = ticker.tick() => self.discover_all().await,
            }
        }
    }

    pub async fn discover_all(&self) {
        let clients: Vec<_> = self
            .clients
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (provider_id, client) in clients {
            if !client.supports(Capability::ListModels) {
                continue;
            }
            if let Err(e) = self.discover_provider(&provider_id, client.as_ref()).await {
                tracing::warn!(provider_id = %provider_id, error = %e, "model discovery failed for provider");
            }
        }
    }

    async fn discover_provider(
        &self,
        provider_id: &str,
        client: &dyn ProviderClient,
    ) -> Result<(), mediaforge_shared::errors::GatewayError> {
        let model_ids = client.list_models().await?;
        let capabilities: Vec<Capability> = DISCOVERABLE
            .into_iter()
            .filter(|c| client.supports(*c))
            .collect();

        let discovered: Vec<DiscoveredModel> = model_ids
            .into_iter()
            .map(|id| DiscoveredModel {
                provider_model_id: id,
                capabilities: capabilities.clone(),
            })
            .collect();

        let previous = self.discovery_cache.provider_models(provider_id).await;
        let changed = previous.as_ref() != Some(&discovered);
        self.discovery_cache
            .put_provider_models(provider_id, discovered.clone())
            .await;

        if changed {
            let capabilities_per_model: HashMap<String, Vec<Capability>> = discovered
                .iter()
                .map(|m| (m.provider_model_id.clone(), m.capabilities.clone()))
                .collect();
            let event = GatewayEvent::ModelCapabilitiesDiscovered {
                provider_id: provider_id.to_string(),
                capabilities_per_model: serde_json::to_value(capabilities_per_model)
                    .unwrap_or(serde_json::Value::Null),
                discovered_at: chrono::Utc::now(),
                correlation_id: Uuid::new_v4().to_string(),
            };
            if let Err(e) = self.events.publish_event(event).await {
                tracing::warn!(provider_id = %provider_id, error = %e, "failed to publish model capabilities discovered");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaforge_shared::errors::GatewayError;
    use mediaforge_shared::messaging::{MessageRouterKind, MessagingProvider};
    use std::time::Duration as StdDuration;

    #[derive(Debug)]
    struct CatalogProvider {
        models: Vec<String>,
    }

    #[async_trait::async_trait]
    impl ProviderClient for CatalogProvider {
        fn provider_id(&self) -> &str {
            "catalog"
        }
        fn supports(&self, capability: Capability) -> bool {
            matches!(capability, Capability::ImageGeneration | Capability::ListModels)
        }
        async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
            Ok(self.models.clone())
        }
        async fn health(&self) -> Result<StdDuration, GatewayError> {
            Ok(StdDuration::from_millis(1))
        }
    }

    fn test_events() -> Arc<MessageClient> {
        Arc::new(MessageClient::new(
            Arc::new(MessagingProvider::new_in_memory()),
            MessageRouterKind::default(),
        ))
    }

    #[tokio::test]
    async fn discover_populates_cache_and_publishes_on_change() {
        let discovery_cache = Arc::new(DiscoveryCache::new(&DiscoverySettings::default()));
        let events = test_events();
        events.ensure_queue("generation_events").await.unwrap();
        let service = ModelDiscoveryService::new(
            discovery_cache.clone(),
            DiscoverySettings::default(),
            events.clone(),
        );
        service.register(Arc::new(CatalogProvider {
            models: vec!["m1".into(), "m2".into()],
        }));

        service.discover_all().await;

        let models = discovery_cache.provider_models("catalog").await.unwrap();
        assert_eq!(models.len(), 2);

        let received = events
            .receive_events(10, StdDuration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn unchanged_discovery_does_not_republish() {
        let discovery_cache = Arc::new(DiscoveryCache::new(&DiscoverySettings::default()));
        let events = test_events();
        events.ensure_queue("generation_events").await.unwrap();
        let service = ModelDiscoveryService::new(
            discovery_cache.clone(),
            DiscoverySettings::default(),
            events.clone(),
        );
        service.register(Arc::new(CatalogProvider {
            models: vec!["m1".into()],
        }));

        service.discover_all().await;
        let _ = events
            .receive_events(10, StdDuration::from_secs(5))
            .await
            .unwrap();

        service.discover_all().await;
        let received = events
            .receive_events(10, StdDuration::from_millis(50))
            .await
            .unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn providers_without_list_models_support_are_skipped() {
        #[derive(Debug)]
        struct NoCatalog;
        #[async_trait::async_trait]
        impl ProviderClient for NoCatalog {
            fn provider_id(&self) -> &str {
                "no_catalog"
            }
            fn supports(&self, _capability: Capability) -> bool {
                false
            }
            async fn health(&self) -> Result<StdDuration, GatewayError> {
                Ok(StdDuration::from_millis(1))
            }
        }

        let discovery_cache = Arc::new(DiscoveryCache::new(&DiscoverySettings::default()));
        let events = test_events();
        let service =
            ModelDiscoveryService::new(discovery_cache.clone(), DiscoverySettings::default(), events);
        service.register(Arc::new(NoCatalog));

        service.discover_all().await;
        assert!(discovery_cache.provider_models("no_catalog").await.is_none());
    }
}
