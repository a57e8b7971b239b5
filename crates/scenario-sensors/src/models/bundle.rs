//! Per-token decoded sensor bundles

use super::channel::{CameraChannel, ChannelMap, LidarChannel};
use super::record::Token;
use crate::decoder::{DecodedImage, DecodedPointCloud};

/// Decoded sensor data for one token
///
/// Either mapping may be empty. Built fresh per accessor call and owned by
/// the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorBundle {
    pub token: Token,
    pub pointclouds: ChannelMap<LidarChannel, DecodedPointCloud>,
    pub images: ChannelMap<CameraChannel, DecodedImage>,
}

impl SensorBundle {
    pub fn empty(token: Token) -> Self {
        Self {
            token,
            pointclouds: ChannelMap::new(),
            images: ChannelMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pointclouds.is_empty() && self.images.is_empty()
    }

    /// One-line description used by the CLI and logs
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .pointclouds
            .iter()
            .map(|(channel, cloud)| format!("{channel}={} points", cloud.len()))
            .collect();
        parts.extend(self.images.iter().map(|(channel, image)| {
            format!("{channel}={}x{}", image.width(), image.height())
        }));

        if parts.is_empty() {
            format!("{}: no sensor data", self.token)
        } else {
            format!("{}: {}", self.token, parts.join(", "))
        }
    }
}
