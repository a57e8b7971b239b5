//! Core sandboxed blob store implementation.

use crate::{
    error::{BlobStoreError, Result},
    security::{set_secure_permissions, validate_key, validate_path_within_sandbox},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, sync::RwLock};

/// Filename prefix of in-progress writes. Never visible under a real key.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Information about a stored blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobInfo {
    pub key: String,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Statistics about stored blobs.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub base_directory: PathBuf,
}

/// Result of a [`SandboxedBlobStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The blob was published under its key by this call.
    Written,
    /// An entry already existed; blobs are write-once so nothing was changed.
    AlreadyPresent,
}

/// Write-once, sandboxed key -> bytes store on the local filesystem.
#[derive(Clone, Debug)]
pub struct SandboxedBlobStore {
    base_dir: PathBuf,
    registry: Arc<RwLock<HashMap<String, BlobInfo>>>,
}

impl SandboxedBlobStore {
    /// Create a new builder for configuring the store.
    #[must_use]
    pub fn builder() -> SandboxedBlobStoreBuilder {
        SandboxedBlobStoreBuilder::new()
    }

    /// Base directory all keys are resolved against.
    #[must_use]
    pub fn base_directory(&self) -> &Path {
        &self.base_dir
    }

    /// Read a blob. A missing entry is `Ok(None)`, not an error.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The key is invalid or escapes the sandbox
    /// - The file exists but cannot be read
    pub async fn get<K: AsRef<str>>(&self, key: K) -> Result<Option<Vec<u8>>> {
        let key = key.as_ref();
        let Some(file_path) = self.resolve_existing(key)? else {
            return Ok(None);
        };

        let content = match fs::read(&file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if let Some(info) = self.registry.write().await.get_mut(key) {
            info.last_accessed = Utc::now();
        }

        Ok(Some(content))
    }

    /// Check whether a blob is present.
    ///
    /// # Errors
    /// Returns an error if the key is invalid or escapes the sandbox.
    pub async fn contains<K: AsRef<str>>(&self, key: K) -> Result<bool> {
        let key = key.as_ref();
        Ok(match self.resolve_existing(key)? {
            Some(path) => fs::metadata(&path).await.is_ok_and(|m| m.is_file()),
            None => false,
        })
    }

    /// Publish a blob under `key`.
    ///
    /// The bytes are written to a temporary file in the destination directory,
    /// synced, then renamed into place without replacing an existing entry. A
    /// reader therefore sees either nothing or the complete blob.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The key is invalid or escapes the sandbox
    /// - Writing or publishing the temporary file fails
    pub async fn put<K: AsRef<str>, C: AsRef<[u8]>>(&self, key: K, contents: C) -> Result<PutOutcome> {
        let key = key.as_ref();
        let file_path = self.resolve_for_write(key).await?;

        if fs::try_exists(&file_path).await.unwrap_or(false) {
            tracing::trace!("Blob already present, skipping write: {}", key);
            return Ok(PutOutcome::AlreadyPresent);
        }

        let parent = file_path
            .parent()
            .ok_or_else(|| BlobStoreError::PathValidation {
                path: file_path.clone(),
                reason: "Path has no parent directory".to_string(),
            })?
            .to_path_buf();
        let bytes = contents.as_ref().to_vec();
        let size_bytes = bytes.len() as u64;
        let target = file_path.clone();
        let owned_key = key.to_string();

        let outcome = tokio::task::spawn_blocking(move || -> Result<PutOutcome> {
            let mut temp = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(&parent)?;
            temp.write_all(&bytes)?;
            temp.as_file().sync_all()?;

            match temp.persist_noclobber(&target) {
                Ok(_) => Ok(PutOutcome::Written),
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    Ok(PutOutcome::AlreadyPresent)
                }
                Err(e) => Err(BlobStoreError::Persist {
                    key: owned_key,
                    source: e.error,
                }),
            }
        })
        .await
        .map_err(|e| BlobStoreError::Io(std::io::Error::other(e)))??;

        if outcome == PutOutcome::Written {
            let now = Utc::now();
            self.registry.write().await.insert(
                key.to_string(),
                BlobInfo {
                    key: key.to_string(),
                    file_path,
                    created_at: now,
                    last_accessed: now,
                    size_bytes,
                },
            );
            tracing::debug!("Published blob {} ({} bytes)", key, size_bytes);
        }

        Ok(outcome)
    }

    /// Remove a single blob. Removing a missing blob is not an error.
    ///
    /// # Errors
    /// Returns an error if the key is invalid or the file cannot be removed.
    pub async fn remove<K: AsRef<str>>(&self, key: K) -> Result<bool> {
        let key = key.as_ref();
        let Some(file_path) = self.resolve_existing(key)? else {
            return Ok(false);
        };

        let removed = match fs::remove_file(&file_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.registry.write().await.remove(key);
        Ok(removed)
    }

    /// Remove every blob in the store. Returns the number of entries removed.
    ///
    /// This is the only reclamation mechanism; nothing is evicted automatically.
    ///
    /// # Errors
    /// Returns an error if the base directory cannot be listed or cleared.
    pub async fn purge(&self) -> Result<usize> {
        let mut registry = self.registry.write().await;
        let removed = registry.len();

        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
        }
        registry.clear();
        drop(registry);

        tracing::info!("Purged {} blobs from {:?}", removed, self.base_dir);
        Ok(removed)
    }

    /// Get blob information from the registry.
    pub async fn blob_info<K: AsRef<str>>(&self, key: K) -> Option<BlobInfo> {
        self.registry.read().await.get(key.as_ref()).cloned()
    }

    /// Get statistics about stored blobs.
    pub async fn stats(&self) -> StoreStats {
        let registry = self.registry.read().await;
        let total_entries = registry.len();
        let total_size_bytes = registry.values().map(|b| b.size_bytes).sum();
        drop(registry);

        StoreStats {
            total_entries,
            total_size_bytes,
            base_directory: self.base_dir.clone(),
        }
    }

    /// Lexically validate a key and make sure it is not one of our temp names.
    fn validated_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;

        let full_path = self.base_dir.join(key);
        if full_path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(TEMP_PREFIX))
        {
            return Err(BlobStoreError::PathValidation {
                path: full_path,
                reason: format!("Key file names may not start with '{TEMP_PREFIX}'"),
            });
        }
        Ok(full_path)
    }

    /// Resolve a key for reading. `None` when its directory does not exist yet.
    fn resolve_existing(&self, key: &str) -> Result<Option<PathBuf>> {
        let full_path = self.validated_path(key)?;
        match full_path.parent() {
            Some(parent) if parent.exists() => {
                validate_path_within_sandbox(&full_path, &self.base_dir)?;
                tracing::trace!("Key validated: '{}' -> '{}'", key, full_path.display());
                Ok(Some(full_path))
            }
            _ => Ok(None),
        }
    }

    /// Resolve a key for writing, creating parent directories as needed.
    async fn resolve_for_write(&self, key: &str) -> Result<PathBuf> {
        let full_path = self.validated_path(key)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobStoreError::DirectoryCreation {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        validate_path_within_sandbox(&full_path, &self.base_dir)?;
        Ok(full_path)
    }

    /// Load existing blobs from disk on startup and drop abandoned temp files.
    async fn load_existing_entries(&self) -> Result<()> {
        let mut pending = vec![self.base_dir.clone()];
        let mut loaded_count = 0;
        let mut stale_count = 0;
        let mut registry = self.registry.write().await;

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let is_temp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(TEMP_PREFIX));
                if is_temp {
                    if let Err(e) = fs::remove_file(&path).await {
                        tracing::warn!("Failed to remove stale temp file {:?}: {}", path, e);
                    } else {
                        stale_count += 1;
                    }
                    continue;
                }

                let Some(key) = relative_key(&self.base_dir, &path) else {
                    continue;
                };
                let metadata = entry.metadata().await?;
                let created_at = DateTime::from(metadata.modified().unwrap_or(std::time::UNIX_EPOCH));

                registry.insert(
                    key.clone(),
                    BlobInfo {
                        key,
                        file_path: path,
                        created_at,
                        last_accessed: created_at,
                        size_bytes: metadata.len(),
                    },
                );
                loaded_count += 1;
            }
        }
        drop(registry);

        if loaded_count > 0 {
            tracing::info!("Loaded {} existing blobs from disk", loaded_count);
        }
        if stale_count > 0 {
            tracing::info!("Removed {} abandoned temporary files", stale_count);
        }

        Ok(())
    }
}

/// Convert a path under `base` back into a `/`-separated key.
fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    let parts = parts?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Builder for configuring a `SandboxedBlobStore`.
pub struct SandboxedBlobStoreBuilder {
    base_directory: Option<PathBuf>,
}

impl SandboxedBlobStoreBuilder {
    fn new() -> Self {
        Self {
            base_directory: None,
        }
    }

    /// Set the base directory for blob storage.
    #[must_use]
    pub fn base_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.base_directory = Some(path.into());
        self
    }

    /// Build the `SandboxedBlobStore`.
    ///
    /// # Errors
    /// Returns an error if:
    /// - Base directory is not set
    /// - Base directory cannot be created or secured
    /// - Existing blob loading fails
    pub async fn build(self) -> Result<SandboxedBlobStore> {
        let base_dir = self
            .base_directory
            .ok_or_else(|| BlobStoreError::Configuration {
                message: "Base directory is required".to_string(),
            })?;

        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| BlobStoreError::DirectoryCreation {
                path: base_dir.clone(),
                source: e,
            })?;

        set_secure_permissions(&base_dir).await?;

        let store = SandboxedBlobStore {
            base_dir,
            registry: Arc::new(RwLock::new(HashMap::new())),
        };

        store.load_existing_entries().await?;

        tracing::info!("SandboxedBlobStore initialized - base_dir: {:?}", store.base_dir);

        Ok(store)
    }
}
