//! `InvalidationRequest` and the cache-family/priority taxonomy consumed by
//! the Batched Cache Invalidator (§4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFamily {
    VirtualKey,
    TaskStatus,
    ModelMapping,
    ProviderCapabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationRequest {
    pub cache_family: CacheFamily,
    pub entity_id: String,
    pub priority: Priority,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

impl InvalidationRequest {
    /// Two requests with identical `(cache_family, entity_id)` are
    /// coalescing-equivalent; the later `queued_at` wins.
    pub fn coalescing_key(&self) -> (CacheFamily, &str) {
        (self.cache_family, &self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_places_critical_highest() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
    }

    #[test]
    fn coalescing_key_ignores_reason_and_priority() {
        let a = InvalidationRequest {
            cache_family: CacheFamily::VirtualKey,
            entity_id: "k1".into(),
            priority: Priority::Normal,
            reason: "update".into(),
            queued_at: Utc::now(),
        };
        let b = InvalidationRequest {
            cache_family: CacheFamily::VirtualKey,
            entity_id: "k1".into(),
            priority: Priority::Critical,
            reason: "delete".into(),
            queued_at: Utc::now(),
        };
        assert_eq!(a.coalescing_key(), b.coalescing_key());
    }
}
