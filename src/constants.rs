// Constants module for shared string constants

pub const CONFIG_FILE: &str = "mirror.toml";
pub const MIRROR_DIR_ENV: &str = "MIRROR_DIR";

/// Name of the index artifact that marks a target as using the split layout
pub const SPLIT_INDEX_FILE: &str = "index.json";
pub const SPLIT_VERSIONS_FILE: &str = "versions.json";
pub const SPLIT_METADATA_FILE: &str = "metadata.json";

/// Checksums recorded by `sync` next to mirrored artifacts
pub const CHECKSUMS_FILE: &str = "checksums.json";

/// Page size used when walking tag listings
pub const TAG_PAGE_SIZE: usize = 100;

/// Streaming chunk size for throttled downloads
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Rate-limit window length in seconds
pub const RATE_WINDOW_SECS: i64 = 60;

/// IP windows idle for longer than this are dropped when state is loaded
pub const STALE_WINDOW_SECS: i64 = 3600;

/// Retry hints sent with 429 and 503 responses
pub const RATE_LIMIT_RETRY_AFTER: &str = "60";
pub const CONCURRENCY_RETRY_AFTER: &str = "300";

/// Schema version for the status --json output format.
/// Increment only on breaking changes to ensure future integrations can safely evolve.
pub const SCHEMA_VERSION: u32 = 1;
