use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::errors::{SensorError, SensorResult};
use crate::models::SensorChannel;
use crate::storage::{CacheOptions, RemoteBackend, TieredBlobCache};

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
    /// Remote tier; absent means local-only operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteBackend>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent channel fetches per request
    #[serde(default = "default_max_parallel_fetches")]
    pub max_parallel_fetches: usize,
    /// Upper bound on one remote fetch (e.g. "30s", "2m")
    #[serde(default = "default_fetch_timeout", with = "duration_serde::duration")]
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Channels fetched when a request names none
    #[serde(default = "default_channels")]
    pub default_channels: Vec<SensorChannel>,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_PATH)
}

fn default_max_parallel_fetches() -> usize {
    DEFAULT_MAX_PARALLEL_FETCHES
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS)
}

fn default_channels() -> Vec<SensorChannel> {
    DEFAULT_CHANNEL.parse().map(|c| vec![c]).unwrap_or_default()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_parallel_fetches: default_max_parallel_fetches(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            default_channels: default_channels(),
        }
    }
}

impl Config {
    /// Reads `path`, writing a default config there first if it does not exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> SensorResult<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                SensorError::configuration(format!("failed to read {}: {e}", path.display()))
            })?;
            Self::from_toml(&contents)?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config).map_err(|e| {
                SensorError::configuration(format!("failed to serialize default config: {e}"))
            })?;
            std::fs::write(path, contents).map_err(|e| {
                SensorError::configuration(format!("failed to write {}: {e}", path.display()))
            })?;
            info!("Created default config file: {}", path.display());
            default_config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> SensorResult<Self> {
        toml::from_str(contents)
            .map_err(|e| SensorError::configuration(format!("invalid configuration: {e}")))
    }

    pub fn validate(&self) -> SensorResult<()> {
        if self.fetch.max_parallel_fetches == 0 {
            return Err(SensorError::configuration(
                "fetch.max_parallel_fetches must be at least 1",
            ));
        }
        if self.fetch.fetch_timeout.is_zero() {
            return Err(SensorError::configuration(
                "fetch.fetch_timeout must be greater than zero",
            ));
        }
        if self.scenario.default_channels.is_empty() {
            return Err(SensorError::configuration(
                "scenario.default_channels must name at least one channel",
            ));
        }
        Ok(())
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            fetch_timeout: self.fetch.fetch_timeout,
        }
    }

    /// Opens the local tier and, when configured, the remote tier
    pub async fn build_cache(&self) -> SensorResult<TieredBlobCache> {
        let local = sandboxed_blob_store::SandboxedBlobStore::builder()
            .base_directory(&self.storage.cache_path)
            .build()
            .await
            .map_err(|e| {
                SensorError::configuration(format!(
                    "failed to open local cache at {}: {e}",
                    self.storage.cache_path.display()
                ))
            })?;

        let remote = self
            .remote
            .as_ref()
            .map(RemoteBackend::build)
            .transpose()
            .map_err(|e| SensorError::configuration(format!("invalid remote store: {e}")))?;

        Ok(TieredBlobCache::new(local, remote, self.cache_options()))
    }
}
