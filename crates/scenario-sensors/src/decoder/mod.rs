//! Sensor payload decoding
//!
//! Turns raw blob bytes plus the declared channel kind into typed sensor data.
//! Decoding is pure: the same bytes and kind always produce the same value or
//! the same [`DecodeError`], and a partially decoded value is never returned.

mod camera;
mod lidar;

pub use camera::DecodedImage;
pub use lidar::{BevRenderOptions, DecodedPointCloud, LidarPoint};

use tracing::trace;

use crate::errors::DecodeError;
use crate::models::ChannelKind;

/// Decoded payload of one channel
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedSensor {
    Image(DecodedImage),
    PointCloud(DecodedPointCloud),
}

impl DecodedSensor {
    pub fn kind(&self) -> ChannelKind {
        match self {
            DecodedSensor::Image(_) => ChannelKind::Camera,
            DecodedSensor::PointCloud(_) => ChannelKind::Lidar,
        }
    }

    pub fn into_image(self) -> Option<DecodedImage> {
        match self {
            DecodedSensor::Image(image) => Some(image),
            DecodedSensor::PointCloud(_) => None,
        }
    }

    pub fn into_point_cloud(self) -> Option<DecodedPointCloud> {
        match self {
            DecodedSensor::PointCloud(cloud) => Some(cloud),
            DecodedSensor::Image(_) => None,
        }
    }
}

/// Stateless decoder dispatching on channel kind
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorDecoder;

impl SensorDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, bytes: &[u8], kind: ChannelKind) -> Result<DecodedSensor, DecodeError> {
        trace!("Decoding {} byte {} payload", bytes.len(), kind);
        match kind {
            ChannelKind::Camera => camera::decode_camera(bytes).map(DecodedSensor::Image),
            ChannelKind::Lidar => lidar::decode_lidar(bytes).map(DecodedSensor::PointCloud),
        }
    }

    pub fn decode_image(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        camera::decode_camera(bytes)
    }

    pub fn decode_point_cloud(&self, bytes: &[u8]) -> Result<DecodedPointCloud, DecodeError> {
        lidar::decode_lidar(bytes)
    }
}
