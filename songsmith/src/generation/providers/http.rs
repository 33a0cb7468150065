//! JSON-over-HTTP provider adapter.
//!
//! One client serves all four generation-side collaborators. Each endpoint is
//! a base URL from [`ProviderEndpoints`]; content is fetched with
//! `GET {content_url}/{source_ref}/items/{item_ref}` with both refs
//! percent-encoded as single path segments, the generators are `POST`ed
//! their request struct as JSON.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url, header};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{
    Artwork, ArtworkProvider, ArtworkRequest, Audio, AudioProvider, AudioRequest, ContentSource,
    ItemContent, Lyrics, LyricsProvider, LyricsRequest, ProviderError, ProviderResult,
};
use crate::config::ProviderEndpoints;

/// HTTP implementation of the content and generation collaborators.
#[derive(Clone)]
pub struct HttpProviders {
    client: Client,
    endpoints: ProviderEndpoints,
}

impl HttpProviders {
    pub fn new(endpoints: ProviderEndpoints) -> Self {
        let client = Client::builder()
            .user_agent(concat!("songsmith/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, endpoints }
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.endpoints.fetch_timeout_secs)
    }

    fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.endpoints.generation_timeout_secs)
    }

    fn content_url(&self, source_ref: &str, item_ref: &str) -> ProviderResult<Url> {
        let base = &self.endpoints.content_url;
        let mut url = Url::parse(base)
            .map_err(|e| ProviderError::Network(format!("invalid content url '{base}': {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Network(format!("content url '{base}' cannot be a base")))?
            .pop_if_empty()
            .extend([source_ref, "items", item_ref]);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.endpoints.api_key {
            Some(key) if !key.is_empty() => request.bearer_auth(key),
            _ => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        timeout: Duration,
        what: &str,
    ) -> ProviderResult<T> {
        let response = self
            .authorize(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            warn!(provider = what, status = status.as_u16(), "Provider call failed");
            return Err(map_status(status, retry_after, body, timeout));
        }

        debug!(provider = what, "Provider call succeeded");
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{what}: {e}")))
    }
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_decode() {
        ProviderError::InvalidResponse(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Map a non-success status onto a provider error.
pub(crate) fn map_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
    timeout: Duration,
) -> ProviderError {
    match status.as_u16() {
        408 => ProviderError::Timeout(timeout),
        429 => ProviderError::RateLimited { retry_after },
        code @ (502..=504) => ProviderError::Unavailable { status: code },
        code => ProviderError::Status {
            status: code,
            message: body,
        },
    }
}

#[async_trait]
impl ContentSource for HttpProviders {
    async fn fetch_item_content(
        &self,
        source_ref: &str,
        item_ref: &str,
    ) -> ProviderResult<ItemContent> {
        let url = self.content_url(source_ref, item_ref)?;
        self.send(self.client.get(url), self.fetch_timeout(), "content")
            .await
    }
}

#[async_trait]
impl LyricsProvider for HttpProviders {
    async fn generate_lyrics(&self, request: &LyricsRequest) -> ProviderResult<Lyrics> {
        let builder = self.client.post(&self.endpoints.lyrics_url).json(request);
        self.send(builder, self.generation_timeout(), "lyrics").await
    }
}

#[async_trait]
impl ArtworkProvider for HttpProviders {
    async fn generate_artwork(&self, request: &ArtworkRequest) -> ProviderResult<Artwork> {
        let builder = self.client.post(&self.endpoints.artwork_url).json(request);
        self.send(builder, self.generation_timeout(), "artwork").await
    }
}

#[async_trait]
impl AudioProvider for HttpProviders {
    async fn generate_audio(&self, request: &AudioRequest) -> ProviderResult<Audio> {
        let builder = self.client.post(&self.endpoints.audio_url).json(request);
        self.send(builder, self.generation_timeout(), "audio").await
    }
}
