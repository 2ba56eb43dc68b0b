//! Constants for the download module (timeouts, block sizes, retry caps).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large product files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default streaming write block size (1 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// Default interval between progress reports (50 MiB).
pub const DEFAULT_LOG_BLOCK_SIZE: u64 = 50 * 1024 * 1024;

/// Read buffer used when hashing local files.
pub const HASH_READ_BUFFER: usize = 1024 * 1024;

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Suffix of the temp file written next to the target while streaming.
pub const PARTIAL_SUFFIX: &str = ".part";
