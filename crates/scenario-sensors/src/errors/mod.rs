//! Centralized error handling for scenario sensor access
//!
//! Every failure surfaced to a caller is a typed error that carries the
//! offending key, token or window. Low-level faults (I/O, HTTP, parse errors)
//! are wrapped, never returned bare.
//!
//! # Error Categories
//!
//! - **Configuration Errors**: malformed scenario windows, invalid settings
//! - **Lookup Errors**: an iteration or token with no corresponding log record
//! - **Cache Errors**: local miss without a remote tier, remote miss, timeouts
//! - **Decode Errors**: bytes present but malformed for the declared channel kind
//! - **Index Errors**: failures reported by the log record index
//!
//! # Usage
//!
//! ```rust
//! use scenario_sensors::errors::{SensorError, SensorResult};
//!
//! fn example_function(duration: f64) -> SensorResult<f64> {
//!     if duration <= 0.0 {
//!         return Err(SensorError::configuration("duration must be positive"));
//!     }
//!     Ok(duration)
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using SensorError
pub type SensorResult<T> = Result<T, SensorError>;

/// Convenience type alias for tiered cache Results
pub type CacheResult<T> = Result<T, CacheError>;

/// Convenience type alias for log record index Results
pub type IndexResult<T> = Result<T, IndexError>;

/// Convenience type alias for remote tier Results
pub type RemoteResult<T> = Result<T, RemoteError>;
