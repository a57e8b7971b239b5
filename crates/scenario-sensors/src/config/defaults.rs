/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Config file
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

// Storage defaults
pub const DEFAULT_CACHE_PATH: &str = "./data/sensor_blobs";

// Remote tier defaults
pub const DEFAULT_REMOTE_CONNECT_TIMEOUT_SECS: u64 = 10;

// Fetch defaults
pub const DEFAULT_MAX_PARALLEL_FETCHES: usize = 8;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

// Scenario defaults
pub const DEFAULT_CHANNEL: &str = "MERGED_PC";

// Bird's-eye-view rendering defaults
pub const DEFAULT_BEV_RESOLUTION_M: f32 = 0.1;
pub const DEFAULT_BEV_EXTENT_M: f32 = 100.0;
pub const MAX_BEV_SIZE_PX: u32 = 8192;
