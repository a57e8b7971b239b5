//! Read-only query surface over a driving log
//!
//! The accessor never reads log rows directly; it asks a [`LogRecordIndex`]
//! which tokens fall into a time range and which payloads a token has per
//! channel.

pub mod manifest;
pub mod memory;

pub use manifest::{LogManifest, ManifestLogIndex, ManifestRecord};
pub use memory::{InMemoryLogIndex, InMemoryLogIndexBuilder};

use crate::errors::IndexResult;
use crate::models::{SensorChannel, SensorRecordRef, Timestamp, Token};

/// Query surface over one log's records
#[async_trait::async_trait]
pub trait LogRecordIndex: Send + Sync {
    /// Name of the log this index covers
    fn log_name(&self) -> &str;

    /// All tokens with `start <= timestamp < end`, ascending by timestamp
    async fn list_tokens_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> IndexResult<Vec<(Token, Timestamp)>>;

    /// Refs recorded for `token` on any of `channels`
    ///
    /// Channels without a record at this token are simply absent from the
    /// result. An unknown token is an [`IndexError::UnknownToken`].
    ///
    /// [`IndexError::UnknownToken`]: crate::errors::IndexError::UnknownToken
    async fn resolve_refs(
        &self,
        token: &Token,
        channels: &[SensorChannel],
    ) -> IndexResult<Vec<SensorRecordRef>>;
}
