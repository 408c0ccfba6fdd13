//! TokenForge Core - optimistic read cache for document store reads.
//!
//! Fronts a remote document store with an in-memory TTL cache, bounded
//! fetch retries and realtime listeners that keep cached entries current.
//! Everything hangs off an explicitly constructed [`DocumentCache`]; there is
//! no global state, so tests and callers can hold isolated instances.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokenforge_core::{DocumentCache, MemoryBackend, OptimizedQueryOptions};
//!
//! #[tokio::main]
//! async fn main() -> tokenforge_core::Result<()> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     let cache = DocumentCache::builder(backend).build();
//!
//!     let options = OptimizedQueryOptions::new()
//!         .with_ttl(Duration::from_secs(60))
//!         .with_retry(3, Duration::from_millis(500))
//!         .with_realtime(true);
//!
//!     let token = cache.get_document_optimized("tokens", "0xabc", &options).await?;
//!     println!("{:?}", token);
//!
//!     cache.unsubscribe_all();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backend;
pub mod cache;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod document;
pub mod error;
pub mod memory;
pub mod query;
pub mod retry;
pub mod subscription;

// Re-export commonly used types
pub use api::{CacheOptions, DocumentCacheBuilder, OptimizedQueryOptions, RetryOptions};
pub use backend::{DocumentBackend, SubscriptionTarget};
pub use cache::{CacheEntry, CacheKey, CacheStats, CacheStore, WriteTicket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{CachedValue, Document};
pub use error::{ForgeError, Result};
pub use memory::MemoryBackend;
pub use query::{Direction, FilterOp, QueryConstraint};
pub use retry::{fetch_with_retry, BackoffPolicy, RetryConfig, RetryStats};
pub use subscription::{SubscriptionHandle, SubscriptionRegistry, SubscriptionSink};

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use config::LogTarget;

/// Read-through cache over a [`DocumentBackend`].
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Every caller
/// sharing one instance sees the same entries and subscriptions.
pub struct DocumentCache<B> {
    backend: Arc<B>,
    store: Arc<CacheStore<CachedValue>>,
    subscriptions: SubscriptionRegistry<CachedValue>,
    freshness_guard: bool,
}

impl<B: DocumentBackend> DocumentCache<B> {
    /// Create a builder for DocumentCache.
    pub fn builder(backend: Arc<B>) -> DocumentCacheBuilder<B> {
        DocumentCacheBuilder::new(backend)
    }

    /// Create a cache with the system clock and the freshness guard on.
    pub fn new(backend: Arc<B>) -> Self {
        Self::builder(backend).build()
    }

    /// The backend this cache reads from.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Read one document through the cache.
    ///
    /// Returns the cached value when caching is enabled and the entry is
    /// still valid. Otherwise fetches (with retry if configured), stores the
    /// result, and attaches a realtime listener if requested. `Ok(None)`
    /// means the document does not exist.
    pub async fn get_document_optimized(
        &self,
        collection: &str,
        id: &str,
        options: &OptimizedQueryOptions,
    ) -> Result<Option<Document>> {
        let key = CacheKey::document(collection, id);

        if let Some(document) = self
            .cached(&key, options)
            .and_then(|hit| kind_checked(&key, hit.into_document()))
        {
            return Ok(document);
        }

        let ticket = self.store.ticket();
        let retry = options.retry_config();
        let document = fetch_with_retry(retry.as_ref(), || {
            self.backend.get_document(collection, id)
        })
        .await?;

        self.settle(&key, CachedValue::Document(document.clone()), ticket, options, || {
            SubscriptionTarget::Document {
                collection: collection.to_string(),
                id: id.to_string(),
            }
        })?;

        Ok(document)
    }

    /// Run a query through the cache.
    ///
    /// Same flow as [`Self::get_document_optimized`], keyed by the
    /// constraint set.
    pub async fn query_optimized(
        &self,
        collection: &str,
        constraints: &[QueryConstraint],
        options: &OptimizedQueryOptions,
    ) -> Result<Vec<Document>> {
        let key = CacheKey::query(collection, constraints)?;

        if let Some(documents) = self
            .cached(&key, options)
            .and_then(|hit| kind_checked(&key, hit.into_documents()))
        {
            return Ok(documents);
        }

        let ticket = self.store.ticket();
        let retry = options.retry_config();
        let documents = fetch_with_retry(retry.as_ref(), || {
            self.backend.execute_query(collection, constraints)
        })
        .await?;

        self.settle(&key, CachedValue::Documents(documents.clone()), ticket, options, || {
            SubscriptionTarget::Query {
                collection: collection.to_string(),
                constraints: constraints.to_vec(),
            }
        })?;

        Ok(documents)
    }

    fn cached(&self, key: &CacheKey, options: &OptimizedQueryOptions) -> Option<CachedValue> {
        if !options.cache.enabled {
            return None;
        }
        self.store.get_valid(key.as_str())
    }

    /// Store a fetched value and attach a listener if requested.
    fn settle(
        &self,
        key: &CacheKey,
        value: CachedValue,
        ticket: WriteTicket,
        options: &OptimizedQueryOptions,
        target: impl FnOnce() -> SubscriptionTarget,
    ) -> Result<()> {
        let ttl = options.cache.ttl();

        if options.cache.enabled {
            if self.freshness_guard {
                self.store.set_if_fresh(key.as_str(), value, ttl, ticket);
            } else {
                self.store.set(key.as_str(), value, ttl);
            }
        }

        if options.realtime {
            self.subscribe(key, ttl, target())?;
        }
        Ok(())
    }

    fn subscribe(&self, key: &CacheKey, ttl: Duration, target: SubscriptionTarget) -> Result<()> {
        debug!(target: LogTarget::SUBSCRIPTION, key = %key, "attaching realtime listener");
        self.subscriptions
            .subscribe(key.as_str(), ttl, |sink| self.backend.subscribe(target, sink))
    }

    /// Drop the cached entry of one document.
    pub fn invalidate_document_cache(&self, collection: &str, id: &str) -> bool {
        self.store.delete(CacheKey::document(collection, id).as_str())
    }

    /// Drop every cached document and query of a collection.
    pub fn invalidate_collection_cache(&self, collection: &str) -> usize {
        self.store
            .delete_by_prefix(&CacheKey::collection_prefix(collection))
    }

    /// Drop every cached entry. Subscriptions stay attached.
    pub fn clear_cache(&self) -> usize {
        self.store.clear()
    }

    /// Cancel every realtime listener.
    pub fn unsubscribe_all(&self) -> usize {
        self.subscriptions.unsubscribe_all()
    }

    /// Cancel the realtime listener of one document, if any.
    pub fn unsubscribe_document(&self, collection: &str, id: &str) -> bool {
        self.subscriptions
            .unsubscribe(CacheKey::document(collection, id).as_str())
    }

    /// Cancel the realtime listener of one query, if any.
    pub fn unsubscribe_query(
        &self,
        collection: &str,
        constraints: &[QueryConstraint],
    ) -> Result<bool> {
        let key = CacheKey::query(collection, constraints)?;
        Ok(self.subscriptions.unsubscribe(key.as_str()))
    }

    /// Remove expired entries from memory.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired()
    }

    /// Entry of `key` as currently stored, expired or not.
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry<CachedValue>> {
        self.store.get(key.as_str())
    }

    /// Whether `key` holds an entry that has not expired yet.
    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.store.is_valid(self.store.get(key.as_str()).as_ref())
    }

    pub fn is_subscribed(&self, key: &CacheKey) -> bool {
        self.subscriptions.is_subscribed(key.as_str())
    }

    /// Cache and subscription statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            subscriptions: self.subscriptions.len(),
            ..self.store.stats()
        }
    }
}

/// A document key can collide with a query key (an id shaped like
/// `query:<digest>`). A value of the other kind is a miss, not an answer.
fn kind_checked<T>(key: &CacheKey, value: Option<T>) -> Option<T> {
    if value.is_none() {
        debug!(target: LogTarget::CACHE, key = %key, "cached value has the wrong kind, refetching");
    }
    value
}
