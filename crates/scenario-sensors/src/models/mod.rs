//! Domain types shared across the extractor, cache, decoder and accessor

pub mod bundle;
pub mod channel;
pub mod record;
pub mod window;

pub use bundle::SensorBundle;
pub use channel::{
    CameraChannel, ChannelKind, ChannelMap, ChannelSlot, LidarChannel, SensorChannel,
    UnknownChannel,
};
pub use record::{BlobKey, SensorRecordRef, Timestamp, Token};
pub use window::{ScenarioWindow, ScenarioWindowParams};
