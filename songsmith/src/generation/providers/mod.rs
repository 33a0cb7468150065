//! Collaborator interfaces consumed by the generation pipeline.
//!
//! Content, lyrics, artwork and audio providers report failures as a typed
//! [`ProviderError`] so the taxonomy can classify them by variant instead of
//! by message text. Catalog writes and the external queue report through the
//! crate-wide [`Error`](crate::Error).

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpProviders;

/// Typed failure of an external provider call.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("provider unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Source material for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemContent {
    pub item_ref: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsRequest {
    pub item_ref: String,
    pub title: String,
    pub language: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lyrics {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtworkRequest {
    pub item_ref: String,
    pub title: String,
    pub lyrics: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRequest {
    pub item_ref: String,
    pub title: String,
    pub language: String,
    pub lyrics: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audio {
    pub url: String,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

/// Catalog identity of one produced unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedItem {
    /// Unit id, unique within the job.
    pub item_id: String,
    pub owner_id: String,
    pub title: String,
    pub language: String,
    pub visibility: String,
}

/// Media produced for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMedia {
    pub lyrics: String,
    pub audio_url: String,
    /// `None` when artwork generation failed.
    pub artwork_url: Option<String>,
}

/// Payload handed to an external queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedGeneration {
    pub job_id: String,
    pub owner_id: String,
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_item_content(&self, source_ref: &str, item_ref: &str)
    -> ProviderResult<ItemContent>;
}

#[async_trait]
pub trait LyricsProvider: Send + Sync {
    async fn generate_lyrics(&self, request: &LyricsRequest) -> ProviderResult<Lyrics>;
}

#[async_trait]
pub trait ArtworkProvider: Send + Sync {
    async fn generate_artwork(&self, request: &ArtworkRequest) -> ProviderResult<Artwork>;
}

#[async_trait]
pub trait AudioProvider: Send + Sync {
    async fn generate_audio(&self, request: &AudioRequest) -> ProviderResult<Audio>;
}

/// Catalog write surface.
///
/// Calling `link_generated_item` more than once for the same
/// `(job_id, item.item_id)` must leave exactly one catalog row and return the
/// same id.
#[async_trait]
pub trait CatalogLinker: Send + Sync {
    async fn link_generated_item(
        &self,
        job_id: &str,
        item: &LinkedItem,
        media: &GeneratedMedia,
    ) -> crate::Result<String>;
}

/// Read-only catalog consistency probes used by the startup integrity check.
#[async_trait]
pub trait CatalogIntegrity: Send + Sync {
    /// Catalog rows whose job no longer exists.
    async fn count_orphaned_links(&self) -> crate::Result<u64>;
}

/// External work queue. `enqueue` returns once the queue acknowledged the job.
#[async_trait]
pub trait ExternalQueue: Send + Sync {
    fn name(&self) -> &str;
    async fn enqueue(&self, job: &QueuedGeneration) -> crate::Result<()>;
}
