//! Scenario Sensors Library
//!
//! Retrieves camera images and lidar point clouds for a logged driving
//! scenario. A scenario window is turned into an ordered token sequence, each
//! token's per-channel records are looked up in a log index, and their blobs
//! are resolved through a local-then-remote cache and decoded.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use scenario_sensors::{
//!     config::Config,
//!     index::ManifestLogIndex,
//!     models::{ScenarioWindow, Timestamp},
//!     ScenarioSensorAccessor,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_from_file("config.toml")?;
//! let cache = config.build_cache().await?;
//! let index = Arc::new(ManifestLogIndex::load("log-manifest.json").await?);
//!
//! let window = ScenarioWindow::new(Some(Timestamp::from_micros(1_000_000)), 1.0, 20.0, 0.5)?;
//! let accessor = ScenarioSensorAccessor::builder()
//!     .log_index(index)
//!     .cache(cache)
//!     .window(window)
//!     .config(&config)
//!     .build()?;
//!
//! let first = accessor.get_sensors_at_iteration(0, None).await?;
//! println!("{}", first.summary());
//!
//! let mut past = Box::pin(accessor.get_past_sensors(window, None));
//! while let Some(bundle) = past.next().await {
//!     println!("{}", bundle?.summary());
//! }
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod config;
pub mod decoder;
pub mod errors;
pub mod extraction;
pub mod index;
pub mod models;
pub mod storage;

pub use accessor::{ScenarioSensorAccessor, ScenarioSensorAccessorBuilder};
pub use config::Config;
pub use decoder::{BevRenderOptions, DecodedImage, DecodedPointCloud, DecodedSensor, SensorDecoder};
pub use errors::{CacheError, DecodeError, IndexError, RemoteError, SensorError, SensorResult};
pub use extraction::{TokenExtractor, TokenSequence, TokenSource};
pub use index::{InMemoryLogIndex, LogRecordIndex, ManifestLogIndex};
pub use models::{
    BlobKey, CameraChannel, ChannelKind, ChannelMap, LidarChannel, ScenarioWindow, SensorBundle,
    SensorChannel, SensorRecordRef, Timestamp, Token,
};
pub use storage::{CacheOptions, CacheStats, RemoteBackend, RemoteStore, TieredBlobCache};
