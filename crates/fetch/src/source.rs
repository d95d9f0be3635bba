//! Candidate transport
//!
//! One protocol for every candidate: peers are sibling peercache nodes
//! speaking the serving endpoint's read protocol, and the origin
//! sentinel is the blob key itself fetched with an HTTP `Range`
//! request. The trait seam exists so the orchestrator can be tested
//! without a network.

use async_trait::async_trait;
use bytes::Bytes;
use peercache_route::Candidate;
use peercache_types::BlobKey;
use thiserror::Error;
use tracing::debug;

/// Per-attempt source error; absorbed by the orchestrator's
/// fallthrough, never surfaced directly.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("unexpected status {0}")]
    Status(u16),

    /// The source authoritatively does not have the blob or range
    #[error("not found")]
    NotFound,

    /// Peer rejected our shared credential
    #[error("unauthorized")]
    Unauthorized,

    #[error("blob key is not a fetchable origin URL: {0}")]
    InvalidOrigin(String),

    #[error("attempt timed out")]
    Timeout,
}

/// Fetches one byte range from one candidate source.
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn fetch_range(
        &self,
        candidate: &Candidate,
        blob: &BlobKey,
        offset: u64,
        length: u64,
    ) -> std::result::Result<Bytes, SourceError>;
}

/// HTTP implementation of [`RangeSource`].
pub struct HttpRangeSource {
    client: reqwest::Client,
    auth_token: String,
}

impl HttpRangeSource {
    pub fn new(auth_token: impl Into<String>) -> std::result::Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;
        Ok(Self {
            client,
            auth_token: auth_token.into(),
        })
    }

    async fn fetch_from_peer(
        &self,
        addr: &str,
        blob: &BlobKey,
        offset: u64,
        length: u64,
    ) -> std::result::Result<Bytes, SourceError> {
        // The blob key travels hex-encoded so opaque keys stay URL-safe.
        let url = format!(
            "http://{}/blobs/{}?offset={}&length={}",
            addr,
            hex::encode(blob.as_str().as_bytes()),
            offset,
            length
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        match response.status().as_u16() {
            200 => response
                .bytes()
                .await
                .map_err(|e| SourceError::Http(e.to_string())),
            401 => Err(SourceError::Unauthorized),
            404 => Err(SourceError::NotFound),
            status => Err(SourceError::Status(status)),
        }
    }

    async fn fetch_from_origin(
        &self,
        blob: &BlobKey,
        offset: u64,
        length: u64,
    ) -> std::result::Result<Bytes, SourceError> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        if !blob.as_str().starts_with("http://") && !blob.as_str().starts_with("https://") {
            return Err(SourceError::InvalidOrigin(blob.as_str().to_string()));
        }

        let end = offset.saturating_add(length - 1);
        let response = self
            .client
            .get(blob.as_str())
            .header(reqwest::header::RANGE, format!("bytes={offset}-{end}"))
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        match response.status().as_u16() {
            206 => response
                .bytes()
                .await
                .map_err(|e| SourceError::Http(e.to_string())),
            // Origin ignored the Range header; slice the window out of
            // the full body ourselves.
            200 => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| SourceError::Http(e.to_string()))?;
                debug!(blob = %blob, "origin ignored range header, slicing full body");
                let lo = (offset.min(body.len() as u64)) as usize;
                let hi = (offset.saturating_add(length).min(body.len() as u64)) as usize;
                if lo >= hi {
                    return Err(SourceError::NotFound);
                }
                Ok(body.slice(lo..hi))
            }
            404 | 416 => Err(SourceError::NotFound),
            status => Err(SourceError::Status(status)),
        }
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn fetch_range(
        &self,
        candidate: &Candidate,
        blob: &BlobKey,
        offset: u64,
        length: u64,
    ) -> std::result::Result<Bytes, SourceError> {
        match candidate {
            Candidate::Peer(addr) => self.fetch_from_peer(addr, blob, offset, length).await,
            Candidate::Origin => self.fetch_from_origin(blob, offset, length).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_origin_requires_http_url() {
        let source = HttpRangeSource::new("token").unwrap();
        let result = source
            .fetch_from_origin(&BlobKey::new("sha256:not-a-url"), 0, 16)
            .await;
        assert!(matches!(result, Err(SourceError::InvalidOrigin(_))));
    }

    #[tokio::test]
    async fn test_origin_zero_length_is_empty() {
        let source = HttpRangeSource::new("token").unwrap();
        let result = source
            .fetch_from_origin(&BlobKey::new("http://127.0.0.1:1/blob"), 0, 0)
            .await
            .unwrap();
        assert!(result.is_empty());
    }
}
