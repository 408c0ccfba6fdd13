//! Keyed TTL store.

use super::entry::{CacheEntry, CacheStats};
use crate::clock::{duration_millis, Clock};
use crate::config::LogTarget;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;

/// Position in the store's write history, taken before a fetch starts.
///
/// A guarded write made with this ticket loses against any entry written
/// after the ticket was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WriteTicket(u64);

/// In-memory key-value store with per-entry expiry.
///
/// No size bound and no eviction. Expired entries stay in the map and read
/// as misses until they are overwritten, deleted or purged.
pub struct CacheStore<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    clock: Arc<dyn Clock>,
    /// Last sequence number handed out.
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    rejected: AtomicU64,
}

impl<T: Clone> CacheStore<T> {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current time according to the store's clock.
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Get the entry for `key`, whether or not it has expired.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.read().get(key).cloned()
    }

    /// Check that an entry exists and has not expired.
    pub fn is_valid(&self, entry: Option<&CacheEntry<T>>) -> bool {
        entry.is_some_and(|e| e.is_valid_at(self.now_millis()))
    }

    /// Get the payload for `key` only if its entry is still valid.
    ///
    /// Counts toward the hit/miss statistics.
    pub fn get_valid(&self, key: &str) -> Option<T> {
        let entry = self.get(key);
        if self.is_valid(entry.as_ref()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(target: LogTarget::CACHE, key, "cache hit");
            entry.map(|e| e.data)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: LogTarget::CACHE,
                key,
                expired = entry.is_some(),
                "cache miss"
            );
            None
        }
    }

    /// Store `data` under `key`, replacing any previous entry.
    pub fn set(&self, key: &str, data: T, ttl: Duration) {
        let mut entries = self.write();
        self.insert_locked(&mut entries, key, data, ttl);
    }

    /// Take a ticket marking the current point in the write history.
    pub fn ticket(&self) -> WriteTicket {
        WriteTicket(self.sequence.load(Ordering::SeqCst))
    }

    /// Store `data` unless the entry for `key` was written after `ticket`.
    ///
    /// Returns `false` if the write was rejected.
    pub fn set_if_fresh(&self, key: &str, data: T, ttl: Duration, ticket: WriteTicket) -> bool {
        let mut entries = self.write();
        if let Some(existing) = entries.get(key) {
            if existing.sequence > ticket.0 {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: LogTarget::CACHE,
                    key,
                    stored_sequence = existing.sequence,
                    ticket = ticket.0,
                    "rejected stale cache write"
                );
                return false;
            }
        }
        self.insert_locked(&mut entries, key, data, ttl);
        true
    }

    fn insert_locked(
        &self,
        entries: &mut HashMap<String, CacheEntry<T>>,
        key: &str,
        data: T,
        ttl: Duration,
    ) {
        let timestamp = self.now_millis();
        let expiry = timestamp.saturating_add(duration_millis(ttl));
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                timestamp,
                expiry,
                sequence,
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: LogTarget::CACHE,
            key,
            ttl_ms = duration_millis(ttl),
            sequence,
            "cache write"
        );
    }

    /// Remove the entry for `key`. Returns whether one existed.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.write().remove(key).is_some();
        if removed {
            debug!(target: LogTarget::CACHE, key, "cache entry invalidated");
        }
        removed
    }

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    pub fn delete_by_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        debug!(target: LogTarget::CACHE, prefix, removed, "cache prefix invalidated");
        removed
    }

    /// Remove all entries. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.write();
        let removed = entries.len();
        entries.clear();
        debug!(target: LogTarget::CACHE, removed, "cache cleared");
        removed
    }

    /// Drop entries that have already expired.
    ///
    /// Reads never do this on their own; this is an explicit maintenance
    /// call for long-lived processes.
    pub fn purge_expired(&self) -> usize {
        let now = self.now_millis();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid_at(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(target: LogTarget::CACHE, removed, "purged expired cache entries");
        }
        removed
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot of the store's counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            rejected_stale_writes: self.rejected.load(Ordering::Relaxed),
            subscriptions: 0,
        }
    }
}
