//! Fetching and decoding tile images.
//!
//! The core only knows the [`TileFetcher`] trait. [`HttpFetcher`] is the
//! production implementation; tests substitute their own.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cubetile_decode::DecodedImage;

use crate::error::{Error, Result};

/// Future type for tile fetches.
#[cfg(not(target_family = "wasm"))]
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<DecodedImage>> + Send + 'a>>;

/// Future type for tile fetches.
///
/// Browser fetches are tied to the JS event loop and are not `Send`.
#[cfg(target_family = "wasm")]
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<DecodedImage>> + 'a>>;

/// Shared cancellation flag for one in-flight fetch.
///
/// Cancellation is best-effort: a fetch checks the flag at its await points,
/// and whoever consumes the result checks it again before using it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fail with [`Error::FetchCancelled`] if the token fired.
    pub fn check(&self, url: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::cancelled(url));
        }
        Ok(())
    }
}

/// Source of decoded tile images.
pub trait TileFetcher {
    /// Fetch and decode the tile at `url`.
    ///
    /// Returns [`Error::FetchCancelled`] if `cancel` fired before the result
    /// was ready, so callers can tell cancellations apart from failures.
    fn fetch<'a>(&'a self, url: &'a str, cancel: &'a CancelToken) -> FetchFuture<'a>;
}

/// Fetches tiles over HTTP and decodes them to RGBA.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher around a preconfigured HTTP client.
    #[must_use]
    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        tracing::trace!(url, "fetching tile");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::FetchFailed {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let data = response.bytes().await.map_err(|e| Error::FetchFailed {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(data.to_vec())
    }
}

impl TileFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str, cancel: &'a CancelToken) -> FetchFuture<'a> {
        Box::pin(async move {
            cancel.check(url)?;
            let data = self.fetch_bytes(url).await?;
            cancel.check(url)?;
            let image = cubetile_decode::decode_image(&data)?;
            tracing::trace!(url, width = image.width, height = image.height, "decoded tile");
            Ok(image)
        })
    }
}
