//! Provider descriptors, credentials, and the model-alias mapping table.

use serde::{Deserialize, Serialize};

/// A facet a model may or may not support (spec GLOSSARY "Capability").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ImageGeneration,
    VideoGeneration,
    Vision,
    ListModels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    OpenAiCompatible,
    StabilityCompatible,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub is_primary: bool,
    pub is_enabled: bool,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub provider_type: ProviderType,
    pub enabled: bool,
    pub credentials: Vec<ProviderCredential>,
}

impl ProviderDescriptor {
    /// Exactly one primary key per enabled provider (spec §3 invariant).
    pub fn primary_credential(&self) -> Option<&ProviderCredential> {
        self.credentials
            .iter()
            .find(|c| c.is_primary && c.is_enabled)
    }

    pub fn has_enabled_credential(&self) -> bool {
        self.credentials.iter().any(|c| c.is_enabled)
    }
}

/// `alias -> (provider_id, provider_model_id, capability flags)` (spec §3).
/// Alias is unique; this is read-mostly reference data, the source of truth
/// consulted before every dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapping {
    pub alias: String,
    pub provider_id: String,
    pub provider_model_id: String,
    pub supports_image_generation: bool,
    pub supports_video_generation: bool,
    pub supports_vision: bool,
}

impl ModelMapping {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::ImageGeneration => self.supports_image_generation,
            Capability::VideoGeneration => self.supports_video_generation,
            Capability::Vision => self.supports_vision,
            Capability::ListModels => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(enabled: bool, creds: Vec<ProviderCredential>) -> ProviderDescriptor {
        ProviderDescriptor {
            id: "p1".into(),
            provider_type: ProviderType::OpenAiCompatible,
            enabled,
            credentials: creds,
        }
    }

    #[test]
    fn primary_credential_requires_both_flags() {
        let desc = descriptor(
            true,
            vec![
                ProviderCredential {
                    is_primary: true,
                    is_enabled: false,
                    api_key: "k1".into(),
                },
                ProviderCredential {
                    is_primary: false,
                    is_enabled: true,
                    api_key: "k2".into(),
                },
            ],
        );
        assert!(desc.primary_credential().is_none());
    }

    #[test]
    fn mapping_supports_checks_named_capability() {
        let mapping = ModelMapping {
            alias: "fast-image".into(),
            provider_id: "p1".into(),
            provider_model_id: "m1".into(),
            supports_image_generation: true,
            supports_video_generation: false,
            supports_vision: false,
        };
        assert!(mapping.supports(Capability::ImageGeneration));
        assert!(!mapping.supports(Capability::VideoGeneration));
    }
}
