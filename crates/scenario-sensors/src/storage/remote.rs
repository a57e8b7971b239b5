//! Remote tier backends
//!
//! The remote tier is only consulted on a local miss. Which backend is used is
//! always explicit configuration ([`RemoteBackend`]); nothing is inferred from
//! the process environment.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::config::defaults::DEFAULT_REMOTE_CONNECT_TIMEOUT_SECS;
use crate::config::duration_serde;
use crate::errors::{RemoteError, RemoteResult};
use crate::models::BlobKey;

/// Object store consulted on a local-tier miss
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Human-readable backend name used in errors and logs
    fn name(&self) -> &str;

    /// Fetches `key`; `Ok(None)` when the store does not hold it
    async fn get(&self, key: &BlobKey) -> RemoteResult<Option<Bytes>>;
}

impl fmt::Debug for dyn RemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStore").field("name", &self.name()).finish()
    }
}

/// Remote backend selection and connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RemoteBackend {
    /// Object store exposed over HTTP(S): `GET {base_url}/{key}`
    Http {
        base_url: String,
        #[serde(default = "default_connect_timeout", with = "duration_serde::duration")]
        connect_timeout: Duration,
        #[serde(
            default,
            with = "duration_serde::option_duration",
            skip_serializing_if = "Option::is_none"
        )]
        request_timeout: Option<Duration>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Mounted bucket or shared filesystem
    Directory { root: PathBuf },
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REMOTE_CONNECT_TIMEOUT_SECS)
}

impl RemoteBackend {
    pub fn http<S: Into<String>>(base_url: S) -> Self {
        RemoteBackend::Http {
            base_url: base_url.into(),
            connect_timeout: default_connect_timeout(),
            request_timeout: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn directory<P: Into<PathBuf>>(root: P) -> Self {
        RemoteBackend::Directory { root: root.into() }
    }

    pub fn build(&self) -> RemoteResult<Arc<dyn RemoteStore>> {
        let store: Arc<dyn RemoteStore> = match self {
            RemoteBackend::Http {
                base_url,
                connect_timeout,
                request_timeout,
                headers,
            } => Arc::new(HttpRemoteStore::new(
                base_url,
                *connect_timeout,
                *request_timeout,
                headers,
            )?),
            RemoteBackend::Directory { root } => Arc::new(DirectoryRemoteStore::new(root.clone())),
        };
        info!("Configured remote store: {}", store.name());
        Ok(store)
    }
}

/// Rejects keys that would escape the backend's namespace
fn check_key(key: &BlobKey) -> RemoteResult<()> {
    let raw = key.as_str();
    let reason = if raw.is_empty() {
        Some("key is empty")
    } else if raw.starts_with('/') || raw.starts_with('\\') {
        Some("key must be relative")
    } else if raw.split(['/', '\\']).any(|part| part == "..") {
        Some("key must not contain '..' segments")
    } else if raw.contains('\0') {
        Some("key contains null bytes")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RemoteError::InvalidKey {
            key: raw.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Blob store reachable over HTTP(S)
pub struct HttpRemoteStore {
    client: Client,
    base_url: Url,
    name: String,
}

impl HttpRemoteStore {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Option<Duration>,
        headers: &BTreeMap<String, String>,
    ) -> RemoteResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(RemoteError::Configuration {
                message: format!("unsupported URL scheme '{}'", base_url.scheme()),
            });
        }

        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| RemoteError::Configuration {
                    message: format!("invalid header name '{name}': {e}"),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| RemoteError::Configuration {
                    message: format!("invalid value for header '{name}': {e}"),
                })?;
            default_headers.insert(header_name, header_value);
        }

        let mut builder = Client::builder()
            .connect_timeout(connect_timeout)
            .default_headers(default_headers);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let name = format!("http:{}", redact_url(&base_url));
        Ok(Self {
            client,
            base_url,
            name,
        })
    }

    /// Appends the key's `/`-separated segments, percent-encoded, to the base path
    fn url_for(&self, key: &BlobKey) -> RemoteResult<Url> {
        check_key(key)?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl {
                url: redact_url(&self.base_url),
                message: "base URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(key.as_str().split('/'));
        Ok(url)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &BlobKey) -> RemoteResult<Option<Bytes>> {
        let url = self.url_for(key)?;
        debug!("Fetching blob from {}", redact_url(&url));

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url: redact_url(&url),
            });
        }

        let body = response.bytes().await?;
        debug!("Fetched {} bytes for {}", body.len(), key);
        Ok(Some(body))
    }
}

/// Strips credentials from a URL before it is logged or put in an error
fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    if !redacted.username().is_empty() || redacted.password().is_some() {
        let _ = redacted.set_username("****");
        let _ = redacted.set_password(Some("****"));
    }
    redacted.to_string()
}

/// Blob store backed by a directory tree (mounted bucket, shared filesystem)
#[derive(Debug, Clone)]
pub struct DirectoryRemoteStore {
    root: PathBuf,
    name: String,
}

impl DirectoryRemoteStore {
    pub fn new(root: PathBuf) -> Self {
        let name = format!("directory:{}", root.display());
        Self { root, name }
    }
}

#[async_trait]
impl RemoteStore for DirectoryRemoteStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &BlobKey) -> RemoteResult<Option<Bytes>> {
        check_key(key)?;
        let path = self.root.join(key.as_str());
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Some(Bytes::from(contents))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Remote store held in memory, counting every fetch
///
/// An optional artificial latency widens the window in which concurrent
/// callers overlap. Single keys can be slowed further with
/// [`InMemoryRemoteStore::stall`].
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    blobs: RwLock<HashMap<BlobKey, Bytes>>,
    stalls: RwLock<HashMap<BlobKey, Duration>>,
    fetches: AtomicUsize,
    latency: Option<Duration>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub async fn insert<K: Into<BlobKey>, B: Into<Bytes>>(&self, key: K, bytes: B) {
        self.blobs.write().await.insert(key.into(), bytes.into());
    }

    /// Delays every fetch of `key` by `latency` in place of the store-wide latency
    pub async fn stall<K: Into<BlobKey>>(&self, key: K, latency: Duration) {
        self.stalls.write().await.insert(key.into(), latency);
    }

    /// Number of `get` calls served so far, hits and misses alike
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &BlobKey) -> RemoteResult<Option<Bytes>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let stall = self.stalls.read().await.get(key).copied();
        if let Some(latency) = stall.or(self.latency) {
            tokio::time::sleep(latency).await;
        }
        Ok(self.blobs.read().await.get(key).cloned())
    }
}
