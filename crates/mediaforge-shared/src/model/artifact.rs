//! `MediaArtifact`: the output of the Artifact Pipeline (§4.5), and the
//! descriptors it consumes as input.

use serde::{Deserialize, Serialize};

/// One item the upstream provider call returned, before post-processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArtifactSource {
    InlineBase64(String),
    Url(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub index: u32,
    pub source: ArtifactSource,
}

/// Output of the Artifact Pipeline (spec §3 `MediaArtifact`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaArtifact {
    pub url: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub storage_key: String,
    pub generator_model: String,
    pub prompt: String,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn default_content_type(&self) -> &'static str {
        match self {
            MediaType::Image => "image/png",
            MediaType::Video => "video/mp4",
        }
    }
}
