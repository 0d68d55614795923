//! Tuning constants carried over verbatim from the source scheduler.

/// Read payloads in 64 KiB blocks while hashing.
pub const HASH_BLOCKSIZE: usize = 65536;

/// Wall-clock cap for a single download cycle.
pub const MAX_DOWNLOAD_RUNTIME_SECONDS: u64 = 60 * 30;

/// Sleep between iterations of the download driver's outer retry loop.
pub const DOWNLOAD_ITERATIONS_SLEEP_SECONDS: u64 = 2;

/// Minimum gap between starting two transfers that share a host.
pub const DOWNLOAD_DOMAIN_THROTTLE_SECONDS: u64 = 5;

pub const DOWNLOAD_CONNECT_TIMEOUT_SECONDS: u64 = 30;
pub const DOWNLOAD_MAX_REDIRECTS: usize = 5;

/// Below this, a URL belongs to the `regular` queue type's timeout bracket.
pub const MIN_TIMEOUT_SECONDS: i64 = 15;
/// Above `MIN_TIMEOUT_SECONDS` and up to this, a URL belongs to `timedout`.
pub const MAX_TIMEOUT_SECONDS: i64 = 300;
/// Domain occupancy above which URLs move into the `samedomain` queue type.
pub const MAX_SAMEDOMAINS: u64 = 50;
/// A failed URL is not retried until this many seconds have passed.
pub const RETRY_FAILED_MIN_SECONDS: i64 = 600;

pub const DAEMON_SLEEP_TIME_SECONDS: u64 = 60;

/// Domain occupancy above which the planner gives that domain its own
/// fairness bucket instead of folding it into its collections' buckets.
pub const DEFAULT_MIN_SAME_DOMAIN_BUCKET: u64 = 100;
