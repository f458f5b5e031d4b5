use async_trait::async_trait;
use std::time::Duration;

use crate::config::{CatalogConfig, DEFAULT_BASE_URL};
use crate::error::NetworkError;
use crate::state::PhotoRecord;

/// Source of photo pages
#[async_trait]
pub trait RemoteFeed: Send + Sync {
    /// Fetch one page (1-based) of at most `page_size` records.
    /// A single attempt; every failure is a `NetworkError`.
    async fn fetch_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<PhotoRecord>, NetworkError>;
}

/// `GET {base_url}/v2/list?page=..&limit=..` returning a JSON array of
/// `{id, author, download_url, ...}`.
#[derive(Debug, Clone)]
pub struct HttpFeed {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpFeed {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(config.base_url.clone(), config.request_timeout)
    }

    fn list_url(&self) -> String {
        format!("{}/v2/list", self.base_url)
    }
}

impl Default for HttpFeed {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, Duration::from_secs(10))
    }
}

#[async_trait]
impl RemoteFeed for HttpFeed {
    async fn fetch_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<PhotoRecord>, NetworkError> {
        let response = self
            .client
            .get(self.list_url())
            .query(&[("page", page), ("limit", page_size)])
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                page,
                status = status.as_u16(),
                "photo listing returned an error status"
            );
            return Err(NetworkError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let photos: Vec<PhotoRecord> =
            serde_json::from_slice(&body).map_err(|e| NetworkError::Decode(e.to_string()))?;

        tracing::debug!(page, count = photos.len(), "📡 fetched photo page");
        Ok(photos)
    }
}
