//! Media storage contract (spec §6: `store(stream, metadata) -> {url,
//! storage_key, size_bytes}`, streaming input; `get(storage_key) -> stream`).
//! Concrete blob-storage backends are external collaborators (spec §1); only
//! this contract is consumed.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use mediaforge_shared::errors::GatewayError;

pub type ByteStream = BoxStream<'static, Result<Bytes, GatewayError>>;

/// Provenance + content metadata for one stored artifact (spec §4.5 step 5).
#[derive(Debug, Clone)]
pub struct MediaMetadata {
    pub content_type: String,
    pub filename: String,
    pub creator_credential_id: i64,
    pub prompt: String,
    pub generator_model: String,
    pub provider_id: String,
    pub original_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub url: String,
    pub storage_key: String,
    pub size_bytes: u64,
}

#[async_trait]
pub trait MediaStorage: Send + Sync {
    async fn store(
        &self,
        stream: ByteStream,
        metadata: MediaMetadata,
    ) -> Result<StoredMedia, GatewayError>;

    async fn get(&self, storage_key: &str) -> Result<ByteStream, GatewayError>;
}

/// Content type from the HTTP response header, falling back to the URL path
/// suffix, falling back to the media type's own default (spec §4.5 step 4).
pub fn infer_content_type(
    header: Option<&str>,
    url: Option<&str>,
    default: &'static str,
) -> String {
    if let Some(h) = header {
        let trimmed = h.split(';').next().unwrap_or(h).trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Some(ext) = url.and_then(extension_from_url) {
        if let Some(guessed) = content_type_from_extension(&ext) {
            return guessed.to_string();
        }
    }
    default.to_string()
}

pub fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last_segment = path.rsplit('/').next()?;
    let ext = last_segment.rsplit_once('.')?.1;
    if ext.is_empty() || ext.len() > 8 {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

fn content_type_from_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => return None,
    })
}
