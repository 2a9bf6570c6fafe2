use crate::types::{FetchConfig, RelayError, Result};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// HTTP side of a feed fetch: one GET, no retries.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Download the raw feed document.
    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<u8>> {
        let start_time = Instant::now();
        let url = validate_feed_url(url)?;

        debug!("Fetching feed: {}", url);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(RelayError::FetchFailure(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let limit = self.config.max_feed_size_mb * 1024 * 1024;

        if let Some(content_length) = response.content_length() {
            if content_length as usize > limit {
                return Err(RelayError::FetchFailure(format!(
                    "Feed too large: {} bytes (max {} bytes)",
                    content_length, limit
                )));
            }
        }

        let body = response.bytes().await?;
        if body.len() > limit {
            return Err(RelayError::FetchFailure(format!(
                "Feed too large: {} bytes (max {} bytes)",
                body.len(),
                limit
            )));
        }

        debug!(
            "Fetched feed {} ({} bytes in {} ms)",
            url,
            body.len(),
            start_time.elapsed().as_millis()
        );

        Ok(body.to_vec())
    }
}

/// Only absolute http(s) URLs are fetchable.
pub fn validate_feed_url(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(RelayError::FetchFailure(format!(
            "Unsupported URL scheme: {}",
            scheme
        ))),
    }
}
