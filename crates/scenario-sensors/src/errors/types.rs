//! Error type definitions for scenario sensor access
//!
//! Layered the same way the components are: the tiered cache, the remote tier,
//! the decoder and the log index each have their own error, and
//! [`SensorError`] wraps all of them for callers of the accessor.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::models::{BlobKey, ChannelKind, Token};

/// Top-level error type returned by the accessor and extractor
#[derive(Error, Debug)]
pub enum SensorError {
    /// Malformed window, missing anchor, or invalid settings. Raised before any arithmetic.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Iteration or token with no corresponding log record
    #[error("Lookup error: {message}")]
    Lookup { message: String },

    /// Tiered cache failures (remote unavailable, blob missing, timeout, ...)
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Payload present but malformed for its channel kind
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Log record index failures
    #[error("Log index error: {0}")]
    Index(#[from] IndexError),
}

/// Tiered blob cache errors
///
/// `Clone` so that every caller waiting on one in-flight fetch receives the
/// same error.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Local miss and no remote tier configured
    #[error(
        "Blob {key} is not in the local cache and no remote store is configured (set the [remote] section to enable remote fetches)"
    )]
    RemoteStoreUnavailable { key: BlobKey },

    /// Remote tier queried and the key is absent
    #[error("Blob {key} not found in remote store '{store}'")]
    BlobNotFound { key: BlobKey, store: String },

    /// Remote fetch exceeded the configured timeout
    #[error("Fetching blob {key} timed out after {timeout:?}")]
    Timeout { key: BlobKey, timeout: Duration },

    /// Caller cancelled while waiting for the blob
    #[error("Fetching blob {key} was cancelled")]
    Cancelled { key: BlobKey },

    /// Remote tier reported a failure other than "absent"
    #[error("Remote store error for blob {key}: {source}")]
    Remote {
        key: BlobKey,
        source: Arc<RemoteError>,
    },

    /// Local tier failed to read
    #[error("Local store error for blob {key}: {source}")]
    LocalStore {
        key: BlobKey,
        source: Arc<sandboxed_blob_store::BlobStoreError>,
    },

    /// The background fetch task died before producing a result
    #[error("Fetch task for blob {key} aborted: {message}")]
    FetchAborted { key: BlobKey, message: String },
}

impl CacheError {
    /// Key the failure refers to
    pub fn key(&self) -> &BlobKey {
        match self {
            Self::RemoteStoreUnavailable { key }
            | Self::BlobNotFound { key, .. }
            | Self::Timeout { key, .. }
            | Self::Cancelled { key }
            | Self::Remote { key, .. }
            | Self::LocalStore { key, .. }
            | Self::FetchAborted { key, .. } => key,
        }
    }
}

/// Remote tier errors
#[derive(Error, Debug)]
pub enum RemoteError {
    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status other than 404
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Filesystem-backed remote I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key or base URL could not form a valid request URL
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Key cannot be mapped into the backend's namespace
    #[error("Invalid blob key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Backend configuration is unusable
    #[error("Invalid remote configuration: {message}")]
    Configuration { message: String },
}

/// Sensor payload decode failure
#[derive(Error, Debug, Clone)]
#[error("Failed to decode {kind} payload ({byte_length} bytes): {reason}")]
pub struct DecodeError {
    pub kind: ChannelKind,
    pub byte_length: usize,
    pub reason: String,
}

/// Log record index errors
#[derive(Error, Debug)]
pub enum IndexError {
    /// Manifest could not be read
    #[error("I/O error reading log index: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest is not valid JSON for the expected schema
    #[error("Invalid log manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Token is unknown to the index
    #[error("Unknown token {token} in log {log_name}")]
    UnknownToken { token: Token, log_name: String },

    /// Records contradict each other (duplicate channel, conflicting timestamps)
    #[error("Inconsistent log records: {message}")]
    Inconsistent { message: String },
}

/// Convenience methods for creating common error types
impl SensorError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a lookup error
    pub fn lookup<S: Into<String>>(message: S) -> Self {
        Self::Lookup {
            message: message.into(),
        }
    }
}

impl DecodeError {
    pub fn new<S: Into<String>>(kind: ChannelKind, byte_length: usize, reason: S) -> Self {
        Self {
            kind,
            byte_length,
            reason: reason.into(),
        }
    }
}
