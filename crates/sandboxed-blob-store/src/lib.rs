//! # Sandboxed Blob Store
//!
//! A write-once key -> bytes store confined to a single base directory. It is the
//! local tier of the scenario sensor cache: blobs fetched from a remote object
//! store are published here and served from disk afterwards.
//!
//! ## Features
//!
//! - **Sandboxed Keys**: Keys are relative `/`-separated paths; absolute keys,
//!   NUL bytes and keys that resolve outside the base directory are rejected
//! - **Atomic Publish**: Writes go to a temporary file in the destination
//!   directory and are renamed into place, so a crash mid-write never exposes a
//!   partial blob under its key
//! - **Write Once**: Publishing an existing key is a no-op
//! - **Restart Aware**: Existing blobs are indexed on startup and abandoned
//!   temporary files are removed
//! - **Manual Purge**: Nothing is evicted automatically; `purge()` clears the store
//!
//! ## Basic Usage
//!
//! ```rust
//! use sandboxed_blob_store::{PutOutcome, SandboxedBlobStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SandboxedBlobStore::builder()
//!     .base_directory("/var/cache/sensor-blobs")
//!     .build()
//!     .await?;
//!
//! let outcome = store.put("2021.05.12.log/CAM_F0/0001.jpg", b"...").await?;
//! assert_eq!(outcome, PutOutcome::Written);
//!
//! let bytes = store.get("2021.05.12.log/CAM_F0/0001.jpg").await?;
//! assert!(bytes.is_some());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod security;
pub mod store;

pub use error::{BlobStoreError, Result};
pub use store::{BlobInfo, PutOutcome, SandboxedBlobStore, SandboxedBlobStoreBuilder, StoreStats};
