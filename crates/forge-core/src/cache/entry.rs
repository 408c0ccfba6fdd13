//! Cache entry and statistics types.

use serde::{Deserialize, Serialize};

/// A cached value with its timing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// The cached payload.
    pub data: T,
    /// When the entry was written (epoch milliseconds).
    pub timestamp: i64,
    /// When the entry stops being valid (epoch milliseconds).
    pub expiry: i64,
    /// Store-wide write number; later writes have larger numbers.
    pub sequence: u64,
}

impl<T> CacheEntry<T> {
    /// An entry is valid strictly before its expiry.
    pub fn is_valid_at(&self, now_millis: i64) -> bool {
        now_millis < self.expiry
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Entries currently held, expired ones included.
    pub entries: usize,
    /// Reads answered from a valid entry.
    pub hits: u64,
    /// Reads that found no entry or an expired one.
    pub misses: u64,
    /// Writes that landed in the store.
    pub writes: u64,
    /// Guarded writes dropped because a newer value was already stored.
    pub rejected_stale_writes: u64,
    /// Live realtime subscriptions.
    pub subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expires_at_boundary() {
        let entry = CacheEntry {
            data: "v",
            timestamp: 0,
            expiry: 1_000,
            sequence: 1,
        };
        assert!(entry.is_valid_at(999));
        assert!(!entry.is_valid_at(1_000));
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let stats = CacheStats {
            rejected_stale_writes: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["rejectedStaleWrites"], 2);
    }
}
