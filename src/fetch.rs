//! Network fetch capability
//!
//! [`HttpFetcher`] is the seam through which the resolver and the segment
//! workers reach the network. [`ReqwestFetcher`] is the production
//! implementation; tests inject scripted fetchers.

use crate::error::{Error, Result};
use crate::retry::IsRetryable;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Transport-level failure (no HTTP status was received)
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Request exceeded its timeout
    #[error("request to {url} timed out")]
    Timeout {
        /// Target URL
        url: String,
    },

    /// Connection could not be established
    #[error("connection to {url} failed: {reason}")]
    Connect {
        /// Target URL
        url: String,
        /// Underlying error
        reason: String,
    },

    /// Any other transport failure (invalid URL, body read error, ...)
    #[error("request to {url} failed: {reason}")]
    Other {
        /// Target URL
        url: String,
        /// Underlying error
        reason: String,
    },
}

impl FetchError {
    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if e.is_connect() {
            FetchError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            }
        } else {
            FetchError::Other {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout { .. } | FetchError::Connect { .. }
        )
    }
}

/// Response of a completed request, whatever its status
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// What a request is for; segment requests carry extra headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Master or media playlist
    Manifest,
    /// Media segment
    Segment,
}

/// Header set sent with a request
pub type RequestHeaders = Vec<(&'static str, String)>;

/// Build the headers many HLS origins require
///
/// `Referer` is the origin of the target URL itself, not of any page. Opaque
/// origins (non-http schemes, unparsable URLs) get no referer.
pub fn request_headers(url: &str, user_agent: &str, kind: RequestKind) -> RequestHeaders {
    let mut headers = Vec::with_capacity(3);

    if let Ok(parsed) = Url::parse(url) {
        let origin = parsed.origin();
        if origin.is_tuple() {
            headers.push(("Referer", origin.ascii_serialization()));
        }
    }

    headers.push(("User-Agent", user_agent.to_string()));

    if kind == RequestKind::Segment {
        headers.push(("Accept", "*/*".to_string()));
    }

    headers
}

/// Network fetch capability
///
/// Implementations return `Ok` for every response that carried an HTTP
/// status, including 4xx/5xx; callers decide what a status means.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// GET `url` with `headers`
    async fn fetch(
        &self,
        url: &str,
        headers: &RequestHeaders,
    ) -> std::result::Result<FetchResponse, FetchError>;
}

/// [`HttpFetcher`] backed by a shared `reqwest::Client`
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Create a fetcher whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "Failed to create HTTP client: {}",
                    e
                )))
            })?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        url: &str,
        headers: &RequestHeaders,
    ) -> std::result::Result<FetchResponse, FetchError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        tracing::debug!(url, status, bytes = body.len(), "Fetched");

        Ok(FetchResponse {
            status,
            body: body.to_vec(),
        })
    }
}
