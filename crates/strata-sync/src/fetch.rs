//! The fetch capability.
//!
//! The downloader is generic over one operation: get a URL, receive a
//! status, an optional length, and a body stream. HTTP and `file://` are
//! built in; an object-store client satisfies the same trait and is
//! injected by the embedding application.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use strata_types::{CacheError, Result};

/// Response to a capability fetch.
pub struct FetchResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl FetchResponse {
    /// Drain the body into a string, enforcing a 200 status.
    pub fn into_string(mut self, url: &str) -> Result<String> {
        if self.status != 200 {
            return Err(CacheError::transport(
                url,
                format!("non-200 response status code {}", self.status),
            ));
        }
        let mut out = String::new();
        self.body
            .read_to_string(&mut out)
            .map_err(|err| CacheError::transport(url, err))?;
        Ok(out)
    }

    /// Drain the body into bytes, enforcing a 200 status.
    pub fn into_bytes(mut self, url: &str) -> Result<Vec<u8>> {
        if self.status != 200 {
            return Err(CacheError::transport(
                url,
                format!("non-200 response status code {}", self.status),
            ));
        }
        let mut out = Vec::new();
        self.body
            .read_to_end(&mut out)
            .map_err(|err| CacheError::transport(url, err))?;
        Ok(out)
    }
}

/// Capability interface every transport implements.
pub trait Fetcher: Send + Sync {
    fn get(&self, url: &str) -> Result<FetchResponse>;
}

/// HTTP(S) transport over a blocking client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// `timeout` bounds the whole request and is meant for small metadata
    /// fetches. `read_timeout` is the no-progress watchdog for unbounded
    /// body streams: a stream that stops yielding bytes for that long
    /// fails instead of hanging the update loop.
    pub fn new(timeout: Option<Duration>, read_timeout: Option<Duration>) -> Result<HttpFetcher> {
        let mut builder = reqwest::blocking::Client::builder().timeout(timeout);
        if let Some(read_timeout) = read_timeout {
            builder = builder.read_timeout(read_timeout);
        }
        let client = builder
            .build()
            .map_err(|err| CacheError::transport("http client", err))?;
        Ok(HttpFetcher { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<FetchResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CacheError::transport(url, err))?;
        Ok(FetchResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

/// `file://` transport; lets mirrors be plain directories (network mounts,
/// fuse mounts, test fixtures).
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn get(&self, url: &str) -> Result<FetchResponse> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        match std::fs::File::open(Path::new(path)) {
            Ok(file) => {
                let content_length = file.metadata().ok().map(|m| m.len());
                Ok(FetchResponse {
                    status: 200,
                    content_length,
                    body: Box::new(file),
                })
            }
            // Mirror HTTP semantics so callers have one error path.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(FetchResponse {
                status: 404,
                content_length: None,
                body: Box::new(std::io::empty()),
            }),
            Err(err) => Err(CacheError::transport(url, err)),
        }
    }
}

/// Split a comma-separated URL list and default bare hosts to `http://`.
pub fn build_base_urls(all_urls: &str) -> Vec<String> {
    all_urls
        .split(',')
        .filter(|url| !url.is_empty())
        .map(|url| {
            if url.starts_with("file://") || url.starts_with("gs://") || url.contains("://") {
                url.to_string()
            } else {
                format!("http://{url}")
            }
        })
        .collect()
}

/// Pick a transport for a base-URL list. `gs://` (or any unknown scheme)
/// has no built-in client; the embedding application injects one through
/// [`crate::Downloader::with_fetchers`].
pub fn make_fetcher(
    base_urls: &[String],
    timeout: Option<Duration>,
    read_timeout: Option<Duration>,
) -> Result<Arc<dyn Fetcher>> {
    match base_urls.first() {
        Some(url) if url.starts_with("file://") => Ok(Arc::new(FileFetcher)),
        Some(url) if url.starts_with("gs://") => Err(CacheError::ConfigInvalid(format!(
            "no built-in fetcher for {url}; inject an object-store fetcher"
        ))),
        _ => Ok(Arc::new(HttpFetcher::new(timeout, read_timeout)?)),
    }
}
