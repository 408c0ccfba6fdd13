//! In-memory TTL cache for document and query reads.
//!
//! - `CacheStore` keeps one entry per key with an absolute expiry time
//! - `CacheKey` derives keys from collection, document id or query constraints
//! - Entries are never evicted on their own; expired entries read as misses
//!   until they are overwritten, invalidated or purged

mod entry;
mod key;
mod store;

pub use entry::{CacheEntry, CacheStats};
pub use key::CacheKey;
pub use store::{CacheStore, WriteTicket};
