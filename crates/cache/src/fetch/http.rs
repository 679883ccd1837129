//! HTTP downloads.

use crate::error::{Error, Result};
use crate::fs::{Filesystem, Staged, blocking};
use crate::hash::{HashingWriter, Sha256Hash};
use async_trait::async_trait;
use bytes::Bytes;
use depot_events::{Event, EventSink, emit_fetch_completed, emit_fetch_failed, emit_fetch_started};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, instrument};
use url::Url;

/// A successful HTTP response whose body has not been read yet.
pub struct HttpResponse {
    /// Length announced by the server, if any.
    pub content_length: Option<u64>,
    /// The response body in chunks.
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Minimal HTTP capability needed to download files.
///
/// Implementations follow redirects themselves and report non-success
/// statuses as [`Error::Transfer`].
#[async_trait]
pub trait HttpClient: Send + Sync + fmt::Debug {
    /// Issue a GET request for `url`.
    async fn get(&self, url: &Url) -> Result<HttpResponse>;
}

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use super::{Error, HttpClient, HttpResponse, Result, Url, async_trait};
    use futures::StreamExt;

    /// Production HTTP client backed by `reqwest`.
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Create a client sending the given `User-Agent`.
        pub fn new(user_agent: &str) -> Result<Self> {
            let client = reqwest::Client::builder()
                .user_agent(user_agent)
                .build()
                .map_err(|e| Error::configuration(format!("Failed to build HTTP client: {e}")))?;
            Ok(Self { client })
        }

        /// Wrap an already configured `reqwest` client.
        #[must_use]
        pub const fn from_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestClient {
        async fn get(&self, url: &Url) -> Result<HttpResponse> {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| Error::transfer(url.as_str(), e.to_string()))?;

            if !response.status().is_success() {
                return Err(Error::transfer(
                    url.as_str(),
                    format!("HTTP {}", response.status()),
                ));
            }

            let content_length = response.content_length();
            let source = url.to_string();
            let body = response
                .bytes_stream()
                .map(move |chunk| chunk.map_err(|e| Error::transfer(source.as_str(), e.to_string())))
                .boxed();
            Ok(HttpResponse {
                content_length,
                body,
            })
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_client::ReqwestClient;

// ============================================================================
// In-memory client
// ============================================================================

#[derive(Debug)]
struct MemoryRoutes {
    bodies: HashMap<String, Bytes>,
    requests: HashMap<String, usize>,
    chunk_size: usize,
}

impl Default for MemoryRoutes {
    fn default() -> Self {
        Self {
            bodies: HashMap::new(),
            requests: HashMap::new(),
            chunk_size: 8 * 1024,
        }
    }
}

/// Serves fixed bodies from memory and counts requests.
///
/// Unknown URLs answer with a 404 transfer error. Clones share routes and
/// counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryHttpClient {
    routes: Arc<Mutex<MemoryRoutes>>,
}

impl MemoryHttpClient {
    /// Create a client with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`.
    #[must_use]
    pub fn with_file(self, url: &str, body: impl Into<Bytes>) -> Self {
        self.insert(url, body);
        self
    }

    /// Split bodies into chunks of at most `chunk_size` bytes.
    #[must_use]
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes.chunk_size = chunk_size.max(1);
        }
        self
    }

    /// Serve `body` at `url`, replacing any previous body.
    pub fn insert(&self, url: &str, body: impl Into<Bytes>) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.bodies.insert(url.to_string(), body.into());
        }
    }

    /// Number of GET requests issued for `url`.
    #[must_use]
    pub fn requests(&self, url: &str) -> usize {
        self.routes
            .lock()
            .map(|routes| routes.requests.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of GET requests issued for any URL.
    #[must_use]
    pub fn total_requests(&self) -> usize {
        self.routes
            .lock()
            .map(|routes| routes.requests.values().sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl HttpClient for MemoryHttpClient {
    async fn get(&self, url: &Url) -> Result<HttpResponse> {
        let (body, chunk_size) = {
            let mut routes = self
                .routes
                .lock()
                .map_err(|_| Error::transfer(url.as_str(), "in-memory routes poisoned"))?;
            *routes.requests.entry(url.to_string()).or_default() += 1;
            let body = routes
                .bodies
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| Error::transfer(url.as_str(), "HTTP 404 Not Found"))?;
            (body, routes.chunk_size)
        };

        let chunks: Vec<Result<Bytes>> = (0..body.len())
            .step_by(chunk_size)
            .map(|start| Ok(body.slice(start..body.len().min(start + chunk_size))))
            .collect();
        Ok(HttpResponse {
            content_length: Some(body.len() as u64),
            body: stream::iter(chunks).boxed(),
        })
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Downloads a URL to a local file, hashing it on the way.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Arc<dyn HttpClient>,
    fs: Arc<dyn Filesystem>,
}

impl HttpFetcher {
    /// Create a fetcher writing through `fs`.
    #[must_use]
    pub fn new(client: Arc<dyn HttpClient>, fs: Arc<dyn Filesystem>) -> Self {
        Self { client, fs }
    }

    /// Download `url` into `destination` and return the digest of the bytes
    /// written.
    ///
    /// `destination` is expected to be a staging path owned by the caller.
    /// It is removed if the transfer fails or the future is dropped. Disk
    /// writes run on the blocking pool.
    #[instrument(name = "http_fetch", skip_all, fields(url = %url, destination = %destination.display()))]
    pub async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        sink: &EventSink,
    ) -> Result<Sha256Hash> {
        emit_fetch_started!("http", url);
        let started = Instant::now();
        match self.transfer(url, destination, sink).await {
            Ok(hash) => {
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                emit_fetch_completed!("http", url, duration_ms);
                Ok(hash)
            }
            Err(e) => {
                emit_fetch_failed!("http", url, e);
                Err(e)
            }
        }
    }

    async fn transfer(&self, url: &Url, destination: &Path, sink: &EventSink) -> Result<Sha256Hash> {
        let response = self.client.get(url).await?;
        let total = response.content_length;
        sink.emit(Event::DownloadStarted {
            url: url.to_string(),
            total_bytes: total,
        });

        let staged = Staged::file(Arc::clone(&self.fs), destination.to_path_buf());
        let fs = Arc::clone(&self.fs);
        let path = destination.to_path_buf();
        let mut writer = blocking("create download", move || {
            fs.create(&path)
                .map(HashingWriter::new)
                .map_err(|e| Error::io(e, &path, "create"))
        })
        .await?;

        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let path = destination.to_path_buf();
            writer = blocking("write download", move || {
                writer
                    .write_all(&chunk)
                    .map_err(|e| Error::io(e, &path, "write"))?;
                Ok(writer)
            })
            .await?;
            sink.emit(Event::DownloadProgress {
                url: url.to_string(),
                downloaded: writer.written(),
                total,
            });
        }

        let path = destination.to_path_buf();
        let (hash, bytes) = blocking("flush download", move || {
            let (hash, bytes, _file) = writer.finish().map_err(|e| Error::io(e, &path, "flush"))?;
            Ok((hash, bytes))
        })
        .await?;
        debug!(bytes, %hash, "Download finished");
        sink.emit(Event::DownloadCompleted {
            url: url.to_string(),
            bytes,
        });

        staged.disarm();
        Ok(hash)
    }
}
