//! Per-call read options.

use crate::clock::duration_millis;
use crate::config::CacheDefaults;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for `get_document_optimized` and `query_optimized`.
///
/// Deserializes from the camelCase shape callers already use:
/// `{ "cache": { "enabled": true, "ttl": 60000 }, "retry": { "count": 3, "delay": 1000 }, "realtime": false }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizedQueryOptions {
    pub cache: CacheOptions,
    /// `None` means a single attempt.
    pub retry: Option<RetryOptions>,
    /// Keep the entry fresh with a realtime listener after fetching.
    pub realtime: bool,
}

/// Cache part of the read options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheOptions {
    pub enabled: bool,
    /// Time-to-live in milliseconds.
    #[serde(rename = "ttl")]
    pub ttl_ms: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: u64::try_from(duration_millis(CacheDefaults::TTL)).unwrap_or(u64::MAX),
        }
    }
}

impl CacheOptions {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Shape of the delay between retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Retry part of the read options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOptions {
    /// Maximum attempts, including the first.
    pub count: u32,
    /// Delay between attempts in milliseconds.
    #[serde(rename = "delay")]
    pub delay_ms: u64,
    #[serde(default)]
    pub backoff: BackoffKind,
}

impl RetryOptions {
    pub fn to_config(&self) -> RetryConfig {
        let config = RetryConfig::fixed(self.count, Duration::from_millis(self.delay_ms));
        match self.backoff {
            BackoffKind::Fixed => config,
            BackoffKind::Exponential => config.exponential(false),
        }
    }
}

impl OptimizedQueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache with the given TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache.enabled = true;
        self.cache.ttl_ms = u64::try_from(duration_millis(ttl)).unwrap_or(u64::MAX);
        self
    }

    /// Skip the cache on read and on write.
    pub fn without_cache(mut self) -> Self {
        self.cache.enabled = false;
        self
    }

    /// Retry failed fetches with a fixed delay.
    pub fn with_retry(mut self, count: u32, delay: Duration) -> Self {
        self.retry = Some(RetryOptions {
            count,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            backoff: BackoffKind::Fixed,
        });
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn retry_config(&self) -> Option<RetryConfig> {
        self.retry.as_ref().map(RetryOptions::to_config)
    }
}
