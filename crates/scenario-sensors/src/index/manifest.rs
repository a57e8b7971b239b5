//! JSON log manifests
//!
//! A manifest lists every (token, channel) record of one log:
//!
//! ```json
//! {
//!   "log_name": "2021.05.12.22.00.38_veh-35_01008_01518",
//!   "records": [
//!     { "token": "a1b2", "timestamp": 1620857000000000, "channel": "MERGED_PC", "blob_key": "lidar/a1b2.pcd" },
//!     { "token": "a1b2", "timestamp": 1620857000000000, "channel": "CAM_F0", "blob_key": "CAM_F0/a1b2.jpg" }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::memory::InMemoryLogIndex;
use crate::errors::IndexResult;
use crate::models::{BlobKey, SensorChannel, SensorRecordRef, Timestamp, Token};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogManifest {
    pub log_name: String,
    #[serde(default)]
    pub records: Vec<ManifestRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub token: Token,
    pub timestamp: Timestamp,
    pub channel: SensorChannel,
    pub blob_key: BlobKey,
}

impl From<ManifestRecord> for SensorRecordRef {
    fn from(record: ManifestRecord) -> Self {
        SensorRecordRef {
            token: record.token,
            timestamp: record.timestamp,
            channel: record.channel,
            blob_key: record.blob_key,
        }
    }
}

/// Loads manifests into an [`InMemoryLogIndex`]
pub struct ManifestLogIndex;

impl ManifestLogIndex {
    pub async fn load<P: AsRef<Path>>(path: P) -> IndexResult<InMemoryLogIndex> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let index = Self::from_json(&contents)?;
        info!(
            "Loaded log manifest {} ({} tokens, {} records)",
            path.display(),
            index.token_count(),
            index.record_count()
        );
        Ok(index)
    }

    pub fn from_json(contents: &str) -> IndexResult<InMemoryLogIndex> {
        let manifest: LogManifest = serde_json::from_str(contents)?;
        Self::from_manifest(manifest)
    }

    pub fn from_manifest(manifest: LogManifest) -> IndexResult<InMemoryLogIndex> {
        InMemoryLogIndex::builder(manifest.log_name)
            .records(manifest.records.into_iter().map(SensorRecordRef::from))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IndexError;
    use crate::index::LogRecordIndex;

    const MANIFEST: &str = r#"{
        "log_name": "test-log",
        "records": [
            { "token": "t1", "timestamp": 2000000, "channel": "MERGED_PC", "blob_key": "lidar/t1.pcd" },
            { "token": "t1", "timestamp": 2000000, "channel": "CAM_F0", "blob_key": "cam/t1.jpg" },
            { "token": "t0", "timestamp": 1000000, "channel": "MERGED_PC", "blob_key": "lidar/t0.pcd" }
        ]
    }"#;

    #[tokio::test]
    async fn test_load_manifest_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("manifest.json");
        tokio::fs::write(&path, MANIFEST).await?;

        let index = ManifestLogIndex::load(&path).await?;
        assert_eq!(index.log_name(), "test-log");
        assert_eq!(index.token_count(), 2);
        assert_eq!(index.record_count(), 3);
        assert_eq!(index.timeline()[0].0, Token::from("t0"));
        Ok(())
    }

    #[test]
    fn test_unknown_channel_is_a_manifest_error() {
        let bad = r#"{"log_name": "x", "records": [
            { "token": "t", "timestamp": 1, "channel": "CAM_Z9", "blob_key": "k" }
        ]}"#;
        assert!(matches!(
            ManifestLogIndex::from_json(bad),
            Err(IndexError::Manifest(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = ManifestLogIndex::load("/nonexistent/manifest.json").await;
        assert!(matches!(result, Err(IndexError::Io(_))));
    }
}
