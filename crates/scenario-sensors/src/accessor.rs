//! Scenario sensor accessor
//!
//! Resolves an iteration (or token) to a [`SensorBundle`]: token lookup via the
//! memoized [`TokenSequence`], per-channel record lookup via the log index,
//! then a bounded concurrent fetch + decode of every resolved blob.
//!
//! # Error policy
//!
//! Lidar and camera channels fail differently. The point cloud is the primary
//! signal: if a requested lidar channel has no record at the token, or its
//! blob cannot be fetched or decoded, the whole call fails. Camera imagery is
//! auxiliary: a camera channel that has no record, cannot be fetched or cannot
//! be decoded is left out of `images` (with a warning for the latter two) and
//! the bundle is still returned.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::config::defaults::DEFAULT_MAX_PARALLEL_FETCHES;
use crate::decoder::{DecodedImage, DecodedPointCloud, SensorDecoder};
use crate::errors::{CacheError, DecodeError, IndexError, SensorError, SensorResult};
use crate::extraction::{TokenExtractor, TokenSequence, TokenSource};
use crate::index::LogRecordIndex;
use crate::models::{
    CameraChannel, ChannelKind, LidarChannel, ScenarioWindow, SensorBundle, SensorChannel,
    SensorRecordRef, Token,
};
use crate::storage::TieredBlobCache;

/// Result of fetching and decoding one channel
enum ChannelOutcome {
    PointCloud(LidarChannel, SensorResult<DecodedPointCloud>),
    Image(CameraChannel, SensorResult<DecodedImage>),
}

/// Façade over extraction, log lookup, the tiered cache and decoding
pub struct ScenarioSensorAccessor {
    log_index: Arc<dyn LogRecordIndex>,
    cache: TieredBlobCache,
    extractor: TokenExtractor,
    source: TokenSource,
    tokens: OnceCell<TokenSequence>,
    default_channels: Vec<SensorChannel>,
    max_parallel_fetches: usize,
    fetch_timeout: Duration,
    cancel: CancellationToken,
    decoder: SensorDecoder,
}

impl std::fmt::Debug for ScenarioSensorAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioSensorAccessor")
            .field("log_name", &self.log_index.log_name())
            .field("source", &self.source)
            .field("default_channels", &self.default_channels)
            .field("max_parallel_fetches", &self.max_parallel_fetches)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl ScenarioSensorAccessor {
    pub fn builder() -> ScenarioSensorAccessorBuilder {
        ScenarioSensorAccessorBuilder::default()
    }

    pub fn log_name(&self) -> &str {
        self.log_index.log_name()
    }

    pub fn cache(&self) -> &TieredBlobCache {
        &self.cache
    }

    pub fn default_channels(&self) -> &[SensorChannel] {
        &self.default_channels
    }

    /// Tokens this accessor iterates over
    ///
    /// Computed on first use and reused for the accessor's lifetime.
    /// Concurrent first callers wait for a single computation.
    pub async fn token_sequence(&self) -> SensorResult<&TokenSequence> {
        self.tokens
            .get_or_try_init(|| self.extractor.resolve(&self.source))
            .await
    }

    pub async fn number_of_iterations(&self) -> SensorResult<usize> {
        Ok(self.token_sequence().await?.len())
    }

    pub async fn token_at(&self, iteration: usize) -> SensorResult<Token> {
        let sequence = self.token_sequence().await?;
        sequence.get(iteration).cloned().ok_or_else(|| {
            SensorError::lookup(format!(
                "iteration {iteration} is out of range for log '{}' ({} iterations)",
                self.log_name(),
                sequence.len()
            ))
        })
    }

    /// Sensor data at the `iteration`-th token of the scenario
    ///
    /// `channels` of `None` means the configured defaults (`MERGED_PC` unless
    /// overridden).
    pub async fn get_sensors_at_iteration(
        &self,
        iteration: usize,
        channels: Option<&[SensorChannel]>,
    ) -> SensorResult<SensorBundle> {
        let token = self.token_at(iteration).await?;
        self.get_sensors_at_token(&token, channels).await
    }

    /// One bundle per token of `window`, in timestamp order
    ///
    /// Lazy: nothing is extracted or fetched until the stream is polled. Each
    /// call starts over from the first token. The stream ends after the first
    /// error.
    pub fn get_past_sensors<'a>(
        &'a self,
        window: ScenarioWindow,
        channels: Option<&'a [SensorChannel]>,
    ) -> impl Stream<Item = SensorResult<SensorBundle>> + Send + 'a {
        async_stream::try_stream! {
            let sequence = self.extractor.extract(&window).await?;
            debug!("Streaming {} bundles from log '{}'", sequence.len(), self.log_name());
            for token in sequence.tokens() {
                let bundle = self.get_sensors_at_token(token, channels).await?;
                yield bundle;
            }
        }
    }

    /// Per-token resolution shared by both public operations
    pub async fn get_sensors_at_token(
        &self,
        token: &Token,
        channels: Option<&[SensorChannel]>,
    ) -> SensorResult<SensorBundle> {
        let requested = dedup_channels(channels.unwrap_or(&self.default_channels));

        let refs = self
            .log_index
            .resolve_refs(token, &requested)
            .await
            .map_err(|e| match e {
                IndexError::UnknownToken { token, log_name } => {
                    SensorError::lookup(format!("token {token} has no records in log '{log_name}'"))
                }
                other => SensorError::Index(other),
            })?;

        for channel in &requested {
            let SensorChannel::Lidar(lidar) = channel else {
                continue;
            };
            if !refs.iter().any(|r| r.channel == *channel) {
                return Err(SensorError::lookup(format!(
                    "no {lidar} record at token {token} in log '{}'",
                    self.log_name()
                )));
            }
        }

        debug!(
            "Resolving {} of {} requested channels at token {}",
            refs.len(),
            requested.len(),
            token
        );

        let outcomes: Vec<ChannelOutcome> = stream::iter(refs)
            .map(|record| self.resolve_channel(record))
            .buffer_unordered(self.max_parallel_fetches)
            .collect()
            .await;

        let mut bundle = SensorBundle::empty(token.clone());
        let mut lidar_failure: Option<SensorError> = None;
        for outcome in outcomes {
            match outcome {
                ChannelOutcome::PointCloud(channel, Ok(cloud)) => {
                    bundle.pointclouds.insert(channel, cloud);
                }
                ChannelOutcome::PointCloud(channel, Err(e)) => {
                    debug!("{} failed at token {}: {}", channel, token, e);
                    if lidar_failure.is_none() {
                        lidar_failure = Some(e);
                    }
                }
                ChannelOutcome::Image(channel, Ok(image)) => {
                    bundle.images.insert(channel, image);
                }
                ChannelOutcome::Image(channel, Err(e)) => {
                    warn!("Omitting {} at token {}: {}", channel, token, e);
                }
            }
        }

        match lidar_failure {
            Some(e) => Err(e),
            None => Ok(bundle),
        }
    }

    async fn resolve_channel(&self, record: SensorRecordRef) -> ChannelOutcome {
        match record.channel {
            SensorChannel::Lidar(channel) => {
                let result = match self.fetch(&record).await {
                    Ok(bytes) => {
                        decode_blocking(self.decoder, bytes, ChannelKind::Lidar, |d, b| {
                            d.decode_point_cloud(b)
                        })
                        .await
                    }
                    Err(e) => Err(e),
                };
                ChannelOutcome::PointCloud(channel, result)
            }
            SensorChannel::Camera(channel) => {
                let result = match self.fetch(&record).await {
                    Ok(bytes) => {
                        decode_blocking(self.decoder, bytes, ChannelKind::Camera, |d, b| {
                            d.decode_image(b)
                        })
                        .await
                    }
                    Err(e) => Err(e),
                };
                ChannelOutcome::Image(channel, result)
            }
        }
    }

    async fn fetch(&self, record: &SensorRecordRef) -> SensorResult<Bytes> {
        let key = &record.blob_key;
        let bytes = tokio::time::timeout(
            self.fetch_timeout,
            self.cache.get_with_cancel(key, &self.cancel),
        )
        .await
        .map_err(|_| CacheError::Timeout {
            key: key.clone(),
            timeout: self.fetch_timeout,
        })??;
        Ok(bytes)
    }
}

/// Runs a decoder off the async worker threads
async fn decode_blocking<T, F>(
    decoder: SensorDecoder,
    bytes: Bytes,
    kind: ChannelKind,
    decode: F,
) -> SensorResult<T>
where
    T: Send + 'static,
    F: FnOnce(&SensorDecoder, &[u8]) -> Result<T, DecodeError> + Send + 'static,
{
    let byte_length = bytes.len();
    let decoded = tokio::task::spawn_blocking(move || decode(&decoder, &bytes[..]))
        .await
        .map_err(|e| DecodeError::new(kind, byte_length, format!("decoder task failed: {e}")))??;
    Ok(decoded)
}

fn dedup_channels(channels: &[SensorChannel]) -> Vec<SensorChannel> {
    let mut unique = Vec::with_capacity(channels.len());
    for channel in channels {
        if !unique.contains(channel) {
            unique.push(*channel);
        }
    }
    unique
}

/// Builder for [`ScenarioSensorAccessor`]
#[derive(Default)]
pub struct ScenarioSensorAccessorBuilder {
    log_index: Option<Arc<dyn LogRecordIndex>>,
    cache: Option<TieredBlobCache>,
    initial_token: Option<Token>,
    window: Option<ScenarioWindow>,
    default_channels: Option<Vec<SensorChannel>>,
    max_parallel_fetches: Option<usize>,
    fetch_timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl ScenarioSensorAccessorBuilder {
    pub fn log_index(mut self, log_index: Arc<dyn LogRecordIndex>) -> Self {
        self.log_index = Some(log_index);
        self
    }

    /// Shared cache handle; clones of one cache coordinate their fetches
    pub fn cache(mut self, cache: TieredBlobCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Single-instant mode. Mutually exclusive with [`window`](Self::window).
    pub fn initial_token<T: Into<Token>>(mut self, token: T) -> Self {
        self.initial_token = Some(token.into());
        self
    }

    pub fn window(mut self, window: ScenarioWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn default_channels<I: IntoIterator<Item = SensorChannel>>(mut self, channels: I) -> Self {
        self.default_channels = Some(channels.into_iter().collect());
        self
    }

    pub fn max_parallel_fetches(mut self, max_parallel_fetches: usize) -> Self {
        self.max_parallel_fetches = Some(max_parallel_fetches);
        self
    }

    /// Upper bound on waiting for one channel's blob, including time spent
    /// behind another caller's in-flight fetch
    pub fn fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = Some(fetch_timeout);
        self
    }

    /// Cancelling this token fails every pending fetch of the accessor with
    /// [`CacheError::Cancelled`]
    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Applies `[fetch]` and `[scenario]` settings
    pub fn config(mut self, config: &Config) -> Self {
        self.default_channels = Some(config.scenario.default_channels.clone());
        self.max_parallel_fetches = Some(config.fetch.max_parallel_fetches);
        self.fetch_timeout = Some(config.fetch.fetch_timeout);
        self
    }

    pub fn build(self) -> SensorResult<ScenarioSensorAccessor> {
        let log_index = self
            .log_index
            .ok_or_else(|| SensorError::configuration("accessor requires a log index"))?;
        let cache = self
            .cache
            .ok_or_else(|| SensorError::configuration("accessor requires a blob cache"))?;

        let source = match (self.initial_token, self.window) {
            (Some(token), None) => TokenSource::InitialToken(token),
            (None, Some(window)) => TokenSource::Window(window),
            (Some(_), Some(_)) => {
                return Err(SensorError::configuration(
                    "set either an initial token or a scenario window, not both",
                ));
            }
            (None, None) => {
                return Err(SensorError::configuration(
                    "accessor requires an initial token or a scenario window",
                ));
            }
        };

        let default_channels = self
            .default_channels
            .unwrap_or_else(|| vec![SensorChannel::Lidar(LidarChannel::MergedPc)]);
        if default_channels.is_empty() {
            return Err(SensorError::configuration(
                "default channel set must not be empty",
            ));
        }

        let max_parallel_fetches = self
            .max_parallel_fetches
            .unwrap_or(DEFAULT_MAX_PARALLEL_FETCHES);
        if max_parallel_fetches == 0 {
            return Err(SensorError::configuration(
                "max_parallel_fetches must be at least 1",
            ));
        }

        let fetch_timeout = self
            .fetch_timeout
            .unwrap_or_else(|| cache.options().fetch_timeout);

        info!(
            "Sensor accessor for log '{}' ({:?}, default channels {:?}, {} parallel fetches)",
            log_index.log_name(),
            source,
            default_channels
                .iter()
                .map(SensorChannel::as_str)
                .collect::<Vec<_>>(),
            max_parallel_fetches
        );

        Ok(ScenarioSensorAccessor {
            extractor: TokenExtractor::new(Arc::clone(&log_index)),
            log_index,
            cache,
            source,
            tokens: OnceCell::new(),
            default_channels: dedup_channels(&default_channels),
            max_parallel_fetches,
            fetch_timeout,
            cancel: self.cancel.unwrap_or_default(),
            decoder: SensorDecoder::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_occurrence_order() {
        let channels = [
            SensorChannel::Camera(CameraChannel::CamF0),
            SensorChannel::Lidar(LidarChannel::MergedPc),
            SensorChannel::Camera(CameraChannel::CamF0),
        ];
        assert_eq!(
            dedup_channels(&channels),
            vec![
                SensorChannel::Camera(CameraChannel::CamF0),
                SensorChannel::Lidar(LidarChannel::MergedPc)
            ]
        );
    }

    #[test]
    fn test_builder_requires_a_token_source() -> Result<(), Box<dyn std::error::Error>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let dir = tempfile::tempdir()?;
        let local = runtime.block_on(
            sandboxed_blob_store::SandboxedBlobStore::builder()
                .base_directory(dir.path())
                .build(),
        )?;
        let cache = TieredBlobCache::new(local, None, Default::default());
        let index: Arc<dyn LogRecordIndex> =
            Arc::new(crate::index::InMemoryLogIndex::builder("log").build()?);

        let missing = ScenarioSensorAccessor::builder()
            .log_index(index.clone())
            .cache(cache.clone())
            .build();
        assert!(matches!(missing, Err(SensorError::Configuration { .. })));

        let zero_parallel = ScenarioSensorAccessor::builder()
            .log_index(index)
            .cache(cache)
            .initial_token("t")
            .max_parallel_fetches(0)
            .build();
        assert!(matches!(zero_parallel, Err(SensorError::Configuration { .. })));
        Ok(())
    }
}
