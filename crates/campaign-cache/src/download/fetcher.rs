//! Network primitive behind the download hub: given a URL, produce a file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use url::Url;

use crate::error::CacheError;

/// Fetches a single asset into `dest`.
///
/// Implementations write to `partial` first and only move the result to
/// `dest` once the body is complete, so a crash never leaves a truncated file
/// under the final name.
#[async_trait]
pub trait AssetFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str, partial: &Path, dest: &Path) -> Result<u64, CacheError>;
}

/// `reqwest`-backed fetcher that streams the response body to disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Fetcher with a default client.
    pub fn with_timeout(timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self::new(client, timeout))
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, partial: &Path, dest: &Path) -> Result<u64, CacheError> {
        let parsed = Url::parse(url).map_err(|e| CacheError::invalid_url(url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CacheError::invalid_url(url, "only http(s) assets can be fetched"));
        }

        let response = self
            .client
            .get(parsed)
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CacheError::http_status(response.status(), url));
        }

        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| CacheError::io("creating", partial, e))?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| CacheError::io("writing", partial, e))?;
            written += chunk.len() as u64;
            trace!(url = %url, written, "asset chunk written");
        }

        file.flush()
            .await
            .map_err(|e| CacheError::io("flushing", partial, e))?;
        drop(file);

        tokio::fs::rename(partial, dest)
            .await
            .map_err(|e| CacheError::io("renaming", dest, e))?;

        debug!(url = %url, bytes = written, "asset downloaded");
        Ok(written)
    }
}
