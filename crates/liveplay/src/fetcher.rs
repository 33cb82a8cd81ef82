// Segment Fetcher: retrieves manifest text and segment payloads over HTTP.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response};
use tracing::{debug, trace};

use crate::config::FetcherConfig;
use crate::error::FetchError;

/// Source of manifest text and segment bytes.
///
/// Implementations do not retry; the session decides what a failure means.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn fetch_manifest(&self, url: &str) -> Result<String, FetchError>;

    /// Fetch a segment, resolving `uri` against `base_url` unless it is absolute.
    async fn fetch_segment(&self, uri: &str, base_url: &str) -> Result<Bytes, FetchError>;
}

/// [`SegmentSource`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(config.headers.clone())
            .connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|source| FetchError::Client { source })?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<Response, FetchError> {
        trace!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(status, url));
        }
        Ok(response)
    }
}

#[async_trait]
impl SegmentSource for HttpFetcher {
    async fn fetch_manifest(&self, url: &str) -> Result<String, FetchError> {
        let response = self.get(url).await?;
        response.text().await.map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })
    }

    async fn fetch_segment(&self, uri: &str, base_url: &str) -> Result<Bytes, FetchError> {
        let url = hls::resolve_segment_url(uri, base_url);
        let response = self.get(&url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Body {
                url: url.clone(),
                source,
            })?;
        debug!(url, size = bytes.len(), "Segment fetched");
        Ok(bytes)
    }
}
