//! The concrete `InvalidationTarget` this core wires the Batched Cache
//! Invalidator against: the Task Status Cache and the Discovery Resolver's
//! capability-availability cache, the two in-process caches this core
//! itself owns. `VirtualKey` and `ModelMapping` entries name caches that
//! live in an external service (spec §1's "only the cache-family taxonomy
//! is consumed, not the virtual-key store or admin CRUD surface behind it")
//! — flushing those families here is a no-op, logged at debug so a
//! misconfigured producer is visible without being treated as an error.

use std::sync::Arc;

use async_trait::async_trait;
use mediaforge_shared::errors::GatewayError;
use mediaforge_shared::model::{Capability, CacheFamily};

use super::InvalidationTarget;
use crate::cache::SharedTaskStatusCache;
use crate::discovery::DiscoveryResolver;

pub struct CoreInvalidationTarget {
    task_cache: SharedTaskStatusCache,
    discovery: Arc<DiscoveryResolver>,
}

impl CoreInvalidationTarget {
    pub fn new(task_cache: SharedTaskStatusCache, discovery: Arc<DiscoveryResolver>) -> Self {
        Self { task_cache, discovery }
    }
}

/// `ProviderCapabilities` entity ids are `<provider_id>:<capability>`,
/// produced by whatever component detects the credential/enablement change
/// (out of this core's scope); unparseable ids are logged and dropped
/// rather than failing the whole batch.
fn parse_provider_capability(entity_id: &str) -> Option<(&str, Capability)> {
    let (provider_id, capability) = entity_id.rsplit_once(':')?;
    let capability = match capability {
        "image_generation" => Capability::ImageGeneration,
        "video_generation" => Capability::VideoGeneration,
        "vision" => Capability::Vision,
        "list_models" => Capability::ListModels,
        _ => return None,
    };
    Some((provider_id, capability))
}

#[async_trait]
impl InvalidationTarget for CoreInvalidationTarget {
    async fn invalidate_one(&self, family: CacheFamily, entity_id: &str) -> Result<(), GatewayError> {
        match family {
            CacheFamily::TaskStatus => {
                self.task_cache.invalidate(entity_id).await;
                Ok(())
            }
            CacheFamily::ProviderCapabilities => {
                match parse_provider_capability(entity_id) {
                    Some((provider_id, capability)) => {
                        self.discovery
                            .invalidate_capability_availability(provider_id, capability)
                            .await;
                    }
                    None => {
                        tracing::debug!(entity_id, "unparseable provider capability invalidation id");
                    }
                }
                Ok(())
            }
            CacheFamily::VirtualKey | CacheFamily::ModelMapping => {
                tracing::debug!(?family, entity_id, "cache family not owned by this core, ignoring");
                Ok(())
            }
        }
    }
}
