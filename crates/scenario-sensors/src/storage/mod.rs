//! Blob storage tiers

pub mod remote;
pub mod tiered;

pub use remote::{
    DirectoryRemoteStore, HttpRemoteStore, InMemoryRemoteStore, RemoteBackend, RemoteStore,
};
pub use tiered::{CacheOptions, CacheStats, TieredBlobCache};
