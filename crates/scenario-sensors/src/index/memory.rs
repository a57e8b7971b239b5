//! In-memory log record index

use std::collections::HashMap;

use tracing::debug;

use super::LogRecordIndex;
use crate::errors::{IndexError, IndexResult};
use crate::models::{SensorChannel, SensorRecordRef, Timestamp, Token};

/// Log index held entirely in memory
///
/// Tokens are kept sorted by timestamp so range queries are two binary
/// searches.
#[derive(Debug, Clone)]
pub struct InMemoryLogIndex {
    log_name: String,
    timeline: Vec<(Token, Timestamp)>,
    refs: HashMap<Token, Vec<SensorRecordRef>>,
}

impl InMemoryLogIndex {
    pub fn builder<S: Into<String>>(log_name: S) -> InMemoryLogIndexBuilder {
        InMemoryLogIndexBuilder {
            log_name: log_name.into(),
            records: Vec::new(),
        }
    }

    /// Number of distinct tokens
    pub fn token_count(&self) -> usize {
        self.timeline.len()
    }

    /// Number of (token, channel) records
    pub fn record_count(&self) -> usize {
        self.refs.values().map(Vec::len).sum()
    }

    /// Timestamp recorded for `token`
    pub fn timestamp_of(&self, token: &Token) -> Option<Timestamp> {
        self.refs
            .get(token)
            .and_then(|refs| refs.first())
            .map(|r| r.timestamp)
    }

    /// Full token timeline, ascending by timestamp
    pub fn timeline(&self) -> &[(Token, Timestamp)] {
        &self.timeline
    }
}

#[async_trait::async_trait]
impl LogRecordIndex for InMemoryLogIndex {
    fn log_name(&self) -> &str {
        &self.log_name
    }

    async fn list_tokens_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> IndexResult<Vec<(Token, Timestamp)>> {
        if end <= start {
            return Ok(Vec::new());
        }
        let lo = self.timeline.partition_point(|(_, ts)| *ts < start);
        let hi = self.timeline.partition_point(|(_, ts)| *ts < end);
        Ok(self.timeline[lo..hi].to_vec())
    }

    async fn resolve_refs(
        &self,
        token: &Token,
        channels: &[SensorChannel],
    ) -> IndexResult<Vec<SensorRecordRef>> {
        let refs = self
            .refs
            .get(token)
            .ok_or_else(|| IndexError::UnknownToken {
                token: token.clone(),
                log_name: self.log_name.clone(),
            })?;

        Ok(refs
            .iter()
            .filter(|r| channels.contains(&r.channel))
            .cloned()
            .collect())
    }
}

/// Builder for [`InMemoryLogIndex`]
#[derive(Debug)]
pub struct InMemoryLogIndexBuilder {
    log_name: String,
    records: Vec<SensorRecordRef>,
}

impl InMemoryLogIndexBuilder {
    pub fn record(mut self, record: SensorRecordRef) -> Self {
        self.records.push(record);
        self
    }

    pub fn records<I: IntoIterator<Item = SensorRecordRef>>(mut self, records: I) -> Self {
        self.records.extend(records);
        self
    }

    /// Sorts the timeline and rejects contradictory records
    pub fn build(self) -> IndexResult<InMemoryLogIndex> {
        let mut refs: HashMap<Token, Vec<SensorRecordRef>> = HashMap::new();

        for record in self.records {
            let entry = refs.entry(record.token.clone()).or_default();
            if let Some(existing) = entry.first()
                && existing.timestamp != record.timestamp
            {
                return Err(IndexError::Inconsistent {
                    message: format!(
                        "token {} recorded at both {} and {}",
                        record.token, existing.timestamp, record.timestamp
                    ),
                });
            }
            if entry.iter().any(|r| r.channel == record.channel) {
                return Err(IndexError::Inconsistent {
                    message: format!(
                        "token {} has more than one {} record",
                        record.token, record.channel
                    ),
                });
            }
            entry.push(record);
        }

        let mut timeline: Vec<(Token, Timestamp)> = refs
            .iter()
            .filter_map(|(token, records)| records.first().map(|r| (token.clone(), r.timestamp)))
            .collect();
        timeline.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        debug!(
            "Built log index '{}' with {} tokens",
            self.log_name,
            timeline.len()
        );

        Ok(InMemoryLogIndex {
            log_name: self.log_name,
            timeline,
            refs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlobKey, CameraChannel, LidarChannel};

    fn lidar(token: &str, ts: i64) -> SensorRecordRef {
        SensorRecordRef {
            token: Token::from(token),
            timestamp: Timestamp::from_micros(ts),
            channel: LidarChannel::MergedPc.into(),
            blob_key: BlobKey::new(format!("lidar/{token}.pcd")),
        }
    }

    fn camera(token: &str, ts: i64, channel: CameraChannel) -> SensorRecordRef {
        SensorRecordRef {
            token: Token::from(token),
            timestamp: Timestamp::from_micros(ts),
            channel: channel.into(),
            blob_key: BlobKey::new(format!("{channel}/{token}.jpg")),
        }
    }

    #[tokio::test]
    async fn test_range_is_half_open_and_sorted() -> IndexResult<()> {
        let index = InMemoryLogIndex::builder("log")
            .record(lidar("c", 300))
            .record(lidar("a", 100))
            .record(lidar("b", 200))
            .build()?;

        let tokens = index
            .list_tokens_in_range(Timestamp::from_micros(100), Timestamp::from_micros(300))
            .await?;
        let names: Vec<&str> = tokens.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let empty = index
            .list_tokens_in_range(Timestamp::from_micros(300), Timestamp::from_micros(300))
            .await?;
        assert!(empty.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_refs_filters_channels() -> IndexResult<()> {
        let index = InMemoryLogIndex::builder("log")
            .record(lidar("a", 100))
            .record(camera("a", 100, CameraChannel::CamF0))
            .build()?;

        let refs = index
            .resolve_refs(
                &Token::from("a"),
                &[CameraChannel::CamF0.into(), CameraChannel::CamB0.into()],
            )
            .await?;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].blob_key.as_str(), "CAM_F0/a.jpg");

        let unknown = index.resolve_refs(&Token::from("zz"), &[]).await;
        assert!(matches!(unknown, Err(IndexError::UnknownToken { .. })));
        Ok(())
    }

    #[test]
    fn test_contradictory_records_are_rejected() {
        let conflicting_time = InMemoryLogIndex::builder("log")
            .record(lidar("a", 100))
            .record(camera("a", 101, CameraChannel::CamF0))
            .build();
        assert!(matches!(conflicting_time, Err(IndexError::Inconsistent { .. })));

        let duplicate_channel = InMemoryLogIndex::builder("log")
            .record(lidar("a", 100))
            .record(lidar("a", 100))
            .build();
        assert!(matches!(duplicate_channel, Err(IndexError::Inconsistent { .. })));
    }
}
