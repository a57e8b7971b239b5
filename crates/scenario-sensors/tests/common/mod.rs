//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use sandboxed_blob_store::SandboxedBlobStore;
use sandboxed_blob_store::store::TEMP_PREFIX;
use scenario_sensors::storage::InMemoryRemoteStore;
use scenario_sensors::{
    BlobKey, CacheOptions, CameraChannel, InMemoryLogIndex, LidarChannel, LogRecordIndex,
    RemoteStore, SensorChannel, SensorRecordRef, TieredBlobCache, Timestamp, Token,
};
use tempfile::TempDir;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// 10 Hz log period in microseconds
pub const FRAME_PERIOD_US: i64 = 100_000;

pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("encode png fixture");
    buffer
}

pub fn pcd_bytes(points: &[(f32, f32, f32)]) -> Vec<u8> {
    let mut pcd = format!(
        "VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\n\
         WIDTH {n}\nHEIGHT 1\nPOINTS {n}\nDATA ascii\n",
        n = points.len()
    );
    for (x, y, z) in points {
        pcd.push_str(&format!("{x} {y} {z}\n"));
    }
    pcd.into_bytes()
}

/// In-progress write files anywhere under `dir`
pub fn temp_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).expect("readable cache dir") {
            let path = entry.expect("dir entry").path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(TEMP_PREFIX))
            {
                found.push(path);
            }
        }
    }
    found
}

pub fn token(frame: usize) -> Token {
    Token::new(format!("tok-{frame}"))
}

pub fn lidar_key(frame: usize) -> BlobKey {
    BlobKey::new(format!("lidar/{frame}.pcd"))
}

pub fn camera_key(channel: CameraChannel, frame: usize) -> BlobKey {
    BlobKey::new(format!("{}/{frame}.png", channel.as_str().to_lowercase()))
}

/// Number of points in frame `frame`'s sweep, so bundles are distinguishable
pub fn points_in_frame(frame: usize) -> usize {
    frame % 5 + 1
}

/// Records for `frames` frames at 10 Hz: one lidar sweep plus one record per
/// camera in `cameras`
pub fn scenario_records(frames: usize, cameras: &[CameraChannel]) -> Vec<SensorRecordRef> {
    let mut records = Vec::new();
    for frame in 0..frames {
        let timestamp = Timestamp::from_micros(frame as i64 * FRAME_PERIOD_US);
        records.push(SensorRecordRef {
            token: token(frame),
            timestamp,
            channel: LidarChannel::MergedPc.into(),
            blob_key: lidar_key(frame),
        });
        for camera in cameras {
            records.push(SensorRecordRef {
                token: token(frame),
                timestamp,
                channel: SensorChannel::Camera(*camera),
                blob_key: camera_key(*camera, frame),
            });
        }
    }
    records
}

/// A logged scenario backed by an in-memory remote and a temp-dir local tier
pub struct Scenario {
    pub dir: TempDir,
    pub index: Arc<InMemoryLogIndex>,
    pub remote: Arc<InMemoryRemoteStore>,
    pub cache: TieredBlobCache,
}

impl Scenario {
    /// Uploads every lidar blob and every camera blob of `cameras`
    pub async fn new(frames: usize, cameras: &[CameraChannel]) -> Self {
        Self::with_latency(frames, cameras, Duration::ZERO).await
    }

    pub async fn with_latency(frames: usize, cameras: &[CameraChannel], latency: Duration) -> Self {
        Self::build(frames, cameras, latency, &[]).await
    }

    /// Indexes every record but leaves `missing` out of the remote
    pub async fn without_blobs(frames: usize, cameras: &[CameraChannel], missing: &[BlobKey]) -> Self {
        Self::build(frames, cameras, Duration::ZERO, missing).await
    }

    async fn build(
        frames: usize,
        cameras: &[CameraChannel],
        latency: Duration,
        missing: &[BlobKey],
    ) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let index = Arc::new(
            InMemoryLogIndex::builder("test-log")
                .records(scenario_records(frames, cameras))
                .build()
                .expect("consistent index"),
        );

        let remote = Arc::new(InMemoryRemoteStore::with_latency(latency));
        for frame in 0..frames {
            let points: Vec<(f32, f32, f32)> = (0..points_in_frame(frame))
                .map(|i| (i as f32, frame as f32 * 0.1, 0.5))
                .collect();
            if !missing.contains(&lidar_key(frame)) {
                remote.insert(lidar_key(frame), pcd_bytes(&points)).await;
            }
            for camera in cameras {
                let key = camera_key(*camera, frame);
                if !missing.contains(&key) {
                    remote.insert(key, png_bytes(4, 3, [frame as u8, 0, 0])).await;
                }
            }
        }

        let local = SandboxedBlobStore::builder()
            .base_directory(dir.path())
            .build()
            .await
            .expect("local tier");
        let remote_store: Arc<dyn RemoteStore> = remote.clone();
        let cache = TieredBlobCache::new(local, Some(remote_store), CacheOptions::default());

        Self {
            dir,
            index,
            remote,
            cache,
        }
    }

    pub fn log_index(&self) -> Arc<dyn LogRecordIndex> {
        self.index.clone()
    }
}
