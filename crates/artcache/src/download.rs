//! Support for downloading resources over HTTP.

use std::error::Error;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url, header};

use crate::config::CacheConfig;
use crate::error::{CacheContents, CacheError};
use crate::key::ResourceKey;

/// The user agent sent with every resource request.
const USER_AGENT: &str = concat!("artcache/", env!("CARGO_PKG_VERSION"));

impl CacheError {
    fn download_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        // Special-case a few error strings
        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        if error_string.contains("SSL routines") {
            error_string = "SSL error".to_string();
        }

        Self::DownloadError(error_string)
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(error: reqwest::Error) -> Self {
        Self::download_error(&error)
    }
}

/// Downloads resources from their remote locators.
///
/// The downloader performs a single plain `GET` per resource. There are no
/// retries and no response caching here; deduplication and persistence are
/// the job of the caller.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    /// Creates a new downloader with timeouts taken from `config`.
    pub fn new(config: &CacheConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Downloads the resource behind the key's locator.
    ///
    /// A locator that does not parse as a URL is treated the same as a
    /// missing resource. Every response outside the 2xx range maps onto a
    /// [`CacheError`] according to its status code.
    pub async fn download(&self, key: &ResourceKey) -> CacheContents<Bytes> {
        let url = Url::parse(key.locator()).map_err(|_| CacheError::NotFound)?;

        tracing::debug!("Fetching resource from `{url}`");

        let builder = self
            .client
            .get(url.clone())
            .header(header::USER_AGENT, USER_AGENT);
        let response = builder.send().await?;

        let status = response.status();
        if status.is_success() {
            let contents = response.bytes().await?;
            metric!(time_raw("caches.download.size") = contents.len() as u64);

            tracing::trace!("Success hitting `{url}`");
            Ok(contents)
        } else if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
            tracing::debug!("Insufficient permissions to download `{url}`: {status}");

            Err(CacheError::PermissionDenied(status.to_string()))
        } else if status.is_client_error() {
            // If it's a client error, chances are it's a 404.
            tracing::debug!("Unexpected client error status code from `{url}`: {status}");

            Err(CacheError::NotFound)
        } else {
            tracing::debug!("Unexpected status code from `{url}`: {status}");

            Err(CacheError::DownloadError(status.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use artcache_test as test;

    #[tokio::test]
    async fn test_download_success() {
        test::setup();

        let server = test::Server::new();
        let downloader = Downloader::new(&CacheConfig::default()).unwrap();

        let key = ResourceKey::from_locator(&server.url("/blob/cover.jpg"));
        let contents = downloader.download(&key).await.unwrap();

        assert_eq!(contents, Bytes::from("cover.jpg"));
        assert_eq!(server.accesses(), 1);
    }

    #[tokio::test]
    async fn test_download_missing() {
        test::setup();

        let server = test::Server::new();
        let downloader = Downloader::new(&CacheConfig::default()).unwrap();

        let key = ResourceKey::from_locator(&server.url("/respond_statuscode/404/cover.jpg"));
        let result = downloader.download(&key).await;

        assert_eq!(result, Err(CacheError::NotFound));
    }

    #[tokio::test]
    async fn test_download_permission_denied() {
        test::setup();

        let server = test::Server::new();
        let downloader = Downloader::new(&CacheConfig::default()).unwrap();

        let key = ResourceKey::from_locator(&server.url("/respond_statuscode/403/cover.jpg"));
        let result = downloader.download(&key).await;

        assert_eq!(
            result,
            Err(CacheError::PermissionDenied("403 Forbidden".into()))
        );
    }

    #[tokio::test]
    async fn test_download_server_error() {
        test::setup();

        let server = test::Server::new();
        let downloader = Downloader::new(&CacheConfig::default()).unwrap();

        let key = ResourceKey::from_locator(&server.url("/respond_statuscode/500/cover.jpg"));
        let result = downloader.download(&key).await;

        assert_eq!(
            result,
            Err(CacheError::DownloadError("500 Internal Server Error".into()))
        );
    }

    #[tokio::test]
    async fn test_download_invalid_locator() {
        test::setup();

        let downloader = Downloader::new(&CacheConfig::default()).unwrap();

        let key = ResourceKey::from_locator("not a locator");
        let result = downloader.download(&key).await;

        assert_eq!(result, Err(CacheError::NotFound));
    }

    #[tokio::test]
    async fn test_download_connection_error() {
        test::setup();

        // Bind to grab a port nothing will be listening on afterwards.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let downloader = Downloader::new(&CacheConfig::default()).unwrap();

        let key = ResourceKey::from_locator(&format!("http://127.0.0.1:{port}/cover.jpg"));
        let result = downloader.download(&key).await;

        assert!(matches!(result, Err(CacheError::DownloadError(_))));
    }
}
