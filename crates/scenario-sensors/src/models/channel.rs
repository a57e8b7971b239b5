//! Sensor channel enumerations and enum-keyed channel tables

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Camera mounting positions recorded in a driving log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CameraChannel {
    CamF0,
    CamB0,
    CamL0,
    CamL1,
    CamL2,
    CamR0,
    CamR1,
    CamR2,
}

/// Lidar sources recorded in a driving log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LidarChannel {
    MergedPc,
}

/// Decoder family a channel's payload belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Camera,
    Lidar,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Camera => write!(f, "camera"),
            ChannelKind::Lidar => write!(f, "lidar"),
        }
    }
}

/// Any channel that can be requested from the accessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorChannel {
    Camera(CameraChannel),
    Lidar(LidarChannel),
}

/// Closed channel enumeration usable as a [`ChannelMap`] key
pub trait ChannelSlot: Copy + Eq + 'static {
    /// Every member, in slot order
    const SLOTS: &'static [Self];

    /// Position of this member in [`Self::SLOTS`]
    fn slot(self) -> usize;
}

impl CameraChannel {
    pub const ALL: [CameraChannel; 8] = [
        CameraChannel::CamF0,
        CameraChannel::CamB0,
        CameraChannel::CamL0,
        CameraChannel::CamL1,
        CameraChannel::CamL2,
        CameraChannel::CamR0,
        CameraChannel::CamR1,
        CameraChannel::CamR2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraChannel::CamF0 => "CAM_F0",
            CameraChannel::CamB0 => "CAM_B0",
            CameraChannel::CamL0 => "CAM_L0",
            CameraChannel::CamL1 => "CAM_L1",
            CameraChannel::CamL2 => "CAM_L2",
            CameraChannel::CamR0 => "CAM_R0",
            CameraChannel::CamR1 => "CAM_R1",
            CameraChannel::CamR2 => "CAM_R2",
        }
    }
}

impl ChannelSlot for CameraChannel {
    const SLOTS: &'static [Self] = &CameraChannel::ALL;

    fn slot(self) -> usize {
        self as usize
    }
}

impl LidarChannel {
    pub const ALL: [LidarChannel; 1] = [LidarChannel::MergedPc];

    pub fn as_str(&self) -> &'static str {
        match self {
            LidarChannel::MergedPc => "MERGED_PC",
        }
    }
}

impl ChannelSlot for LidarChannel {
    const SLOTS: &'static [Self] = &LidarChannel::ALL;

    fn slot(self) -> usize {
        self as usize
    }
}

impl SensorChannel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            SensorChannel::Camera(_) => ChannelKind::Camera,
            SensorChannel::Lidar(_) => ChannelKind::Lidar,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorChannel::Camera(camera) => camera.as_str(),
            SensorChannel::Lidar(lidar) => lidar.as_str(),
        }
    }

    /// Every camera and lidar channel
    pub fn all() -> impl Iterator<Item = SensorChannel> {
        CameraChannel::ALL
            .into_iter()
            .map(SensorChannel::Camera)
            .chain(LidarChannel::ALL.into_iter().map(SensorChannel::Lidar))
    }
}

impl From<CameraChannel> for SensorChannel {
    fn from(channel: CameraChannel) -> Self {
        SensorChannel::Camera(channel)
    }
}

impl From<LidarChannel> for SensorChannel {
    fn from(channel: LidarChannel) -> Self {
        SensorChannel::Lidar(channel)
    }
}

/// Error returned when a string names no known channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown sensor channel '{0}'")]
pub struct UnknownChannel(pub String);

impl FromStr for CameraChannel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CameraChannel::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

impl FromStr for LidarChannel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LidarChannel::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

impl FromStr for SensorChannel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<CameraChannel>()
            .map(SensorChannel::Camera)
            .or_else(|_| s.parse::<LidarChannel>().map(SensorChannel::Lidar))
    }
}

impl fmt::Display for CameraChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LidarChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Channels are stored and configured by their log names ("CAM_F0", "MERGED_PC").
macro_rules! serde_as_str {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

serde_as_str!(CameraChannel);
serde_as_str!(LidarChannel);
serde_as_str!(SensorChannel);

/// Fixed-size table keyed by a closed channel enumeration
///
/// One slot per enum member; no hashing and no dynamic channel discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMap<C: ChannelSlot, V> {
    slots: Vec<Option<V>>,
    _channel: std::marker::PhantomData<C>,
}

impl<C: ChannelSlot, V> ChannelMap<C, V> {
    pub fn new() -> Self {
        Self {
            slots: C::SLOTS.iter().map(|_| None).collect(),
            _channel: std::marker::PhantomData,
        }
    }

    /// Stores `value` for `channel`, returning the previous value if any
    pub fn insert(&mut self, channel: C, value: V) -> Option<V> {
        self.slots[channel.slot()].replace(value)
    }

    pub fn get(&self, channel: C) -> Option<&V> {
        self.slots[channel.slot()].as_ref()
    }

    pub fn remove(&mut self, channel: C) -> Option<V> {
        self.slots[channel.slot()].take()
    }

    pub fn contains(&self, channel: C) -> bool {
        self.slots[channel.slot()].is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Occupied channels in enumeration order
    pub fn channels(&self) -> impl Iterator<Item = C> + '_ {
        self.iter().map(|(channel, _)| channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = (C, &V)> + '_ {
        C::SLOTS
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(channel, slot)| slot.as_ref().map(|value| (*channel, value)))
    }
}

impl<C: ChannelSlot, V> Default for ChannelMap<C, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ChannelSlot, V> FromIterator<(C, V)> for ChannelMap<C, V> {
    fn from_iter<I: IntoIterator<Item = (C, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (channel, value) in iter {
            map.insert(channel, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_round_trip_through_from_str() {
        for channel in SensorChannel::all() {
            assert_eq!(channel.as_str().parse::<SensorChannel>(), Ok(channel));
        }
        assert_eq!("cam_f0".parse::<CameraChannel>(), Ok(CameraChannel::CamF0));
        assert!("CAM_X9".parse::<SensorChannel>().is_err());
    }

    #[test]
    fn test_channel_kind() {
        assert_eq!(SensorChannel::from(CameraChannel::CamL1).kind(), ChannelKind::Camera);
        assert_eq!(SensorChannel::from(LidarChannel::MergedPc).kind(), ChannelKind::Lidar);
    }

    #[test]
    fn test_channel_map_slots() {
        let mut map: ChannelMap<CameraChannel, u32> = ChannelMap::new();
        assert!(map.is_empty());

        map.insert(CameraChannel::CamR2, 2);
        map.insert(CameraChannel::CamF0, 0);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(CameraChannel::CamF0), Some(&0));
        assert!(!map.contains(CameraChannel::CamB0));

        let channels: Vec<_> = map.channels().collect();
        assert_eq!(channels, vec![CameraChannel::CamF0, CameraChannel::CamR2]);

        assert_eq!(map.remove(CameraChannel::CamF0), Some(0));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_serde_uses_log_names() -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(&vec![
            SensorChannel::Lidar(LidarChannel::MergedPc),
            SensorChannel::Camera(CameraChannel::CamF0),
        ])?;
        assert_eq!(json, r#"["MERGED_PC","CAM_F0"]"#);

        let parsed: Vec<SensorChannel> = serde_json::from_str(&json)?;
        assert_eq!(parsed.len(), 2);
        Ok(())
    }
}
