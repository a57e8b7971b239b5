//! Two-tier blob cache: local sandboxed store first, optional remote store on a miss
//!
//! Remote hits are published into the local tier with an atomic write, so a
//! crash or cancellation never leaves a partial blob visible under its key.
//! Concurrent misses for the same key share one background fetch
//! (single-flight): one remote request and one local write no matter how many
//! callers are waiting, and every waiter receives the same bytes or the same
//! error.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use sandboxed_blob_store::{PutOutcome, SandboxedBlobStore};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::remote::RemoteStore;
use crate::config::defaults::DEFAULT_FETCH_TIMEOUT_SECS;
use crate::errors::{CacheError, CacheResult};
use crate::models::BlobKey;

type Flight = Shared<BoxFuture<'static, CacheResult<Bytes>>>;

/// Tuning for [`TieredBlobCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Upper bound on one remote fetch
    pub fetch_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub local_hits: u64,
    pub remote_hits: u64,
    pub remote_misses: u64,
    /// Callers that joined a fetch already in flight instead of starting one
    pub coalesced_waiters: u64,
    /// Blobs published to the local tier by this cache
    pub local_writes: u64,
    pub write_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    remote_misses: AtomicU64,
    coalesced_waiters: AtomicU64,
    local_writes: AtomicU64,
    write_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            remote_misses: self.remote_misses.load(Ordering::Relaxed),
            coalesced_waiters: self.coalesced_waiters.load(Ordering::Relaxed),
            local_writes: self.local_writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

struct CacheInner {
    local: SandboxedBlobStore,
    remote: Option<Arc<dyn RemoteStore>>,
    options: CacheOptions,
    in_flight: Mutex<HashMap<BlobKey, Flight>>,
    counters: Counters,
}

/// Shared handle to the tiered cache. Cloning is cheap and every clone sees
/// the same local tier, remote tier and in-flight table.
#[derive(Clone)]
pub struct TieredBlobCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for TieredBlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredBlobCache")
            .field("local", &self.inner.local.base_directory())
            .field("remote", &self.inner.remote.as_ref().map(|r| r.name()))
            .field("options", &self.inner.options)
            .finish()
    }
}

impl TieredBlobCache {
    pub fn new(
        local: SandboxedBlobStore,
        remote: Option<Arc<dyn RemoteStore>>,
        options: CacheOptions,
    ) -> Self {
        debug!(
            "Tiered blob cache at {} (remote: {}, fetch timeout: {:?})",
            local.base_directory().display(),
            remote.as_ref().map(|r| r.name()).unwrap_or("none"),
            options.fetch_timeout
        );
        Self {
            inner: Arc::new(CacheInner {
                local,
                remote,
                options,
                in_flight: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Local tier handle
    pub fn local(&self) -> &SandboxedBlobStore {
        &self.inner.local
    }

    pub fn has_remote(&self) -> bool {
        self.inner.remote.is_some()
    }

    pub fn options(&self) -> CacheOptions {
        self.inner.options
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }

    /// Resolves `key` to its bytes
    ///
    /// 1. Local hit: returned immediately, the remote tier is not touched.
    /// 2. Local miss without a remote tier: [`CacheError::RemoteStoreUnavailable`].
    /// 3. Remote hit: published to the local tier, then returned.
    /// 4. Remote miss: [`CacheError::BlobNotFound`].
    pub async fn get(&self, key: &BlobKey) -> CacheResult<Bytes> {
        if let Some(bytes) = self.inner.read_local(key).await? {
            trace!("Local hit for {}", key);
            return Ok(bytes);
        }

        if self.inner.remote.is_none() {
            return Err(CacheError::RemoteStoreUnavailable { key: key.clone() });
        }

        let flight = self.join_or_start_flight(key).await;
        flight.await
    }

    /// Like [`get`](Self::get), but gives up as soon as `cancel` fires
    ///
    /// Only this caller stops waiting. A fetch already in flight keeps running
    /// for any other waiters and still publishes to the local tier.
    pub async fn get_with_cancel(
        &self,
        key: &BlobKey,
        cancel: &CancellationToken,
    ) -> CacheResult<Bytes> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Fetch of {} cancelled by caller", key);
                Err(CacheError::Cancelled { key: key.clone() })
            }
            result = self.get(key) => result,
        }
    }

    async fn join_or_start_flight(&self, key: &BlobKey) -> Flight {
        let mut in_flight = self.inner.in_flight.lock().await;
        if let Some(existing) = in_flight.get(key) {
            Counters::bump(&self.inner.counters.coalesced_waiters);
            debug!("Joining in-flight fetch for {}", key);
            return existing.clone();
        }

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = inner.fetch_and_publish(&task_key).await;
            // Settled: the next miss for this key starts a fresh flight
            inner.in_flight.lock().await.remove(&task_key);
            result
        });

        let join_inner = Arc::clone(&self.inner);
        let join_key = key.clone();
        let flight: Flight = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    // The task never reached its own cleanup
                    join_inner.in_flight.lock().await.remove(&join_key);
                    Err(CacheError::FetchAborted {
                        key: join_key,
                        message: e.to_string(),
                    })
                }
            }
        }
        .boxed()
        .shared();

        in_flight.insert(key.clone(), flight.clone());
        flight
    }
}

impl CacheInner {
    async fn read_local(&self, key: &BlobKey) -> CacheResult<Option<Bytes>> {
        match self.local.get(key.as_str()).await {
            Ok(Some(contents)) => {
                Counters::bump(&self.counters.local_hits);
                Ok(Some(Bytes::from(contents)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(CacheError::LocalStore {
                key: key.clone(),
                source: Arc::new(e),
            }),
        }
    }

    /// Body of one flight. Runs detached from any caller.
    async fn fetch_and_publish(&self, key: &BlobKey) -> CacheResult<Bytes> {
        // A flight that settled between our local miss and registration may
        // already have published the blob.
        if let Some(bytes) = self.read_local(key).await? {
            return Ok(bytes);
        }

        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| CacheError::RemoteStoreUnavailable { key: key.clone() })?;

        let timeout = self.options.fetch_timeout;
        let fetched = tokio::time::timeout(timeout, remote.get(key))
            .await
            .map_err(|_| CacheError::Timeout {
                key: key.clone(),
                timeout,
            })?
            .map_err(|e| CacheError::Remote {
                key: key.clone(),
                source: Arc::new(e),
            })?;

        let Some(bytes) = fetched else {
            Counters::bump(&self.counters.remote_misses);
            debug!("Remote miss for {} in {}", key, remote.name());
            return Err(CacheError::BlobNotFound {
                key: key.clone(),
                store: remote.name().to_string(),
            });
        };
        Counters::bump(&self.counters.remote_hits);

        match self.local.put(key.as_str(), &bytes).await {
            Ok(PutOutcome::Written) => {
                Counters::bump(&self.counters.local_writes);
                debug!("Cached {} ({} bytes) in local tier", key, bytes.len());
            }
            Ok(PutOutcome::AlreadyPresent) => {
                debug!("{} already present in local tier", key);
            }
            Err(e) => {
                Counters::bump(&self.counters.write_failures);
                warn!("Failed to cache {} locally, serving remote bytes: {}", key, e);
            }
        }

        Ok(bytes)
    }
}
