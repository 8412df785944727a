//! Source image fetching.
//!
//! The [`Fetcher`] trait abstracts where original images come from, which
//! keeps the pipeline testable without a network. The production
//! implementation is [`HttpFetcher`], a thin wrapper over a pooled
//! `reqwest` client.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// User agent sent with every source fetch.
const USER_AGENT: &str = concat!("imagekiln/", env!("CARGO_PKG_VERSION"));

/// Why a source image could not be fetched.
///
/// Every variant classifies as "source unavailable" to the caller; the
/// split exists for logs and retry decisions, not for the surface.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("source not found at {url}")]
    NotFound { url: String },

    #[error("source fetch from {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("source fetch from {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// What a fetch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The source was downloaded from the origin.
    Downloaded(Vec<u8>),
    /// The implementation knows the source is already cached locally and
    /// skipped the download.
    AlreadyPresent,
}

/// Fetches original images by URL.
pub trait Fetcher: Send + Sync + 'static {
    /// Fetches the source image at `url`.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchOutcome, FetchError>> + Send;
}

/// HTTP fetcher over a pooled async client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(32)
            .tcp_nodelay(true)
            .build()
            .map_err(|err| FetchError::ClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome, FetchError> {
        trace!(url, "source fetch starting");

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    url,
                    error = %err,
                    is_connect = err.is_connect(),
                    is_timeout = err.is_timeout(),
                    "source fetch failed"
                );
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    message: err.to_string(),
                });
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(url, "source does not exist at origin");
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "source fetch error status");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        match response.bytes().await {
            Ok(bytes) => {
                debug!(url, size_bytes = bytes.len(), "source downloaded");
                Ok(FetchOutcome::Downloaded(bytes.to_vec()))
            }
            Err(err) => {
                warn!(url, error = %err, "source body read failed");
                Err(FetchError::Transport {
                    url: url.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_builds_with_timeout() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5));
        assert!(fetcher.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_transport_error() {
        let fetcher = HttpFetcher::new(Duration::from_millis(200)).unwrap();
        // Reserved TEST-NET-1 address; nothing answers there.
        let err = fetcher
            .fetch("http://192.0.2.1/products/42/original")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }
}
