use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::feed::parser::{parse_feed, FetchedFeed};
use crate::util::validate_url;

/// Upper bound on a single backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Upper bound on `max_retries` taken from configuration
pub const MAX_RETRIES: u32 = 10;

/// Errors that can occur while fetching a feed document.
///
/// These errors cover the full lifecycle of a fetch: URL policy, network
/// issues, HTTP errors and parsing failures.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The fetch target is not allowed (bad scheme, localhost, private IP)
    #[error("Refusing to fetch: {0}")]
    Blocked(String),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Source of feed documents for the resolver.
#[allow(async_fn_in_trait)]
pub trait FeedFetcher: Send + Sync {
    /// Fetches and parses the feed identified by `feed_url` from `source_url`.
    ///
    /// The two are the same URL when a feed is first subscribed; they differ
    /// when content is pulled from a mirror or a push hub.
    async fn fetch(&self, feed_url: &str, source_url: &str) -> Result<FetchedFeed, FetchError>;
}

/// Limits applied by [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_size: usize,
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    pub backoff_base: Duration,
    /// Skip the SSRF check (local development and tests)
    pub allow_private_hosts: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_size: 10 * 1024 * 1024, // 10MB
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            allow_private_hosts: false,
        }
    }
}

impl From<&Config> for FetchOptions {
    fn from(config: &Config) -> Self {
        if config.max_retries > MAX_RETRIES {
            tracing::warn!(
                configured = config.max_retries,
                limit = MAX_RETRIES,
                "max_retries too large, clamping"
            );
        }
        Self {
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            max_size: config.max_feed_size_bytes,
            max_retries: config.max_retries.min(MAX_RETRIES),
            allow_private_hosts: config.allow_private_hosts,
            ..Self::default()
        }
    }
}

/// [`FeedFetcher`] over HTTP(S) with bounded retries.
///
/// - Each request is bounded by `timeout`
/// - HTTP 429 and 5xx trigger exponential backoff, up to `max_retries`
///   with each delay capped at [`MAX_BACKOFF`]
/// - 4xx fails immediately
/// - Bodies over `max_size` are rejected, truncated bodies retried
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    options: FetchOptions,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, options: FetchOptions) -> Self {
        Self { client, options }
    }

    /// `backoff_base * 2^retry_count`, capped at [`MAX_BACKOFF`].
    fn backoff(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.options.backoff_base.checked_mul(factor))
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }

    async fn fetch_bytes(&self, source_url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            let response =
                tokio::time::timeout(self.options.timeout, self.client.get(source_url).send())
                    .await
                    .map_err(|_| FetchError::Timeout)?
                    .map_err(FetchError::Network)?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= self.options.max_retries {
                    return Err(if status.is_server_error() {
                        FetchError::HttpStatus(status.as_u16())
                    } else {
                        FetchError::RateLimited(self.options.max_retries)
                    });
                }

                let delay = self.backoff(retry_count);
                tracing::warn!(
                    url = %source_url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Feed server unavailable, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, self.options.max_size).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= self.options.max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }

                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        url = %source_url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, feed_url: &str, source_url: &str) -> Result<FetchedFeed, FetchError> {
        if !self.options.allow_private_hosts {
            validate_url(source_url).map_err(|e| FetchError::Blocked(e.to_string()))?;
        }

        let bytes = self.fetch_bytes(source_url).await?;
        let fetched =
            parse_feed(&bytes, Utc::now()).map_err(|e| FetchError::Parse(e.to_string()))?;

        tracing::debug!(
            feed = %feed_url,
            source = %source_url,
            stories = fetched.stories.len(),
            "Fetched feed"
        );
        Ok(fetched)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
