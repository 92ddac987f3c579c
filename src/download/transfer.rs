//! Byte transfer seam between the download engine and the network.
//!
//! The engine drives retries and the partial-file lifecycle; a [`Transfer`]
//! only moves bytes from a URL into the partial path. The HTTP
//! implementation resumes interrupted transfers with a `Range` request and
//! restarts from scratch when the server ignores the range.

use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

/// Errors from a single transfer attempt.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Request could not be sent or the body stream broke.
    #[error("network error transferring {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// Server answered with a non-success status.
    #[error("HTTP {status} transferring {url}")]
    HttpStatus { url: String, status: StatusCode },
    /// Local filesystem write failed.
    #[error("failed writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    fn network(url: &str, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.to_string(),
            source,
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Moves the bytes behind `url` into `partial`.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Fetches `url` into `partial`, resuming from existing partial bytes
    /// where the protocol allows. On success `partial` holds the complete
    /// payload; on failure whatever bytes arrived stay in place for a later
    /// resume.
    async fn fetch(&self, url: &str, partial: &Path) -> Result<(), TransferError>;
}

/// HTTP transfer with range-based resume.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl Default for HttpTransfer {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransfer {
    /// Creates a transfer with a connect timeout but no total deadline;
    /// media payloads can legitimately stream for a long time.
    #[must_use]
    pub fn new() -> Self {
        #[allow(clippy::expect_used)]
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    #[instrument(skip(self, partial), fields(partial = %partial.display()))]
    async fn fetch(&self, url: &str, partial: &Path) -> Result<(), TransferError> {
        let existing = tokio::fs::metadata(partial).await.map_or(0, |m| m.len());

        let mut request = self.client.get(url);
        if existing > 0 {
            debug!(existing, "resuming from partial bytes");
            request = request.header(RANGE, format!("bytes={existing}-"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransferError::network(url, e))?;

        let status = response.status();
        let append = match status {
            StatusCode::PARTIAL_CONTENT => true,
            StatusCode::OK => {
                if existing > 0 {
                    warn!(url, "server ignored range request, restarting transfer");
                }
                false
            }
            _ => {
                return Err(TransferError::HttpStatus {
                    url: url.to_string(),
                    status,
                });
            }
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(append)
            .write(true)
            .truncate(!append)
            .open(partial)
            .await
            .map_err(|e| TransferError::io(partial, e))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransferError::network(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TransferError::io(partial, e))?;
        }
        file.flush().await.map_err(|e| TransferError::io(partial, e))?;
        Ok(())
    }
}
