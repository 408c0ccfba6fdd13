//! Centralized defaults for the read cache.
//!
//! Per-call behavior is set through [`crate::OptimizedQueryOptions`]; the
//! constants here are what those options fall back to.

use std::time::Duration;

/// Cache-level defaults.
pub struct CacheDefaults;

impl CacheDefaults {
    /// TTL applied when the caller does not pick one (5 minutes).
    pub const TTL: Duration = Duration::from_secs(300);
    /// Separator between a collection name and the rest of a cache key.
    pub const KEY_SEPARATOR: char = '/';
    /// Marker placed in front of the constraint digest of a query key.
    pub const QUERY_KEY_MARKER: &'static str = "query:";
}

/// Retry defaults, used when a caller asks for retries without details.
pub struct RetryDefaults;

impl RetryDefaults {
    pub const ATTEMPTS: u32 = 3;
    pub const DELAY: Duration = Duration::from_millis(1000);
    pub const EXPONENTIAL_FACTOR: f64 = 2.0;
    pub const MAX_DELAY: Duration = Duration::from_secs(30);
}

/// Log targets used as the category tag of every event.
pub struct LogTarget;

impl LogTarget {
    pub const CACHE: &'static str = "tokenforge::cache";
    pub const RETRY: &'static str = "tokenforge::retry";
    pub const SUBSCRIPTION: &'static str = "tokenforge::subscription";
    pub const BACKEND: &'static str = "tokenforge::backend";
}
