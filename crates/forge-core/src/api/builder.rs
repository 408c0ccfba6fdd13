//! Builder for configuring a DocumentCache.

use std::sync::Arc;

use crate::backend::DocumentBackend;
use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::subscription::SubscriptionRegistry;
use crate::DocumentCache;

/// Builder for configuring a [`DocumentCache`].
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use tokenforge_core::{DocumentCache, MemoryBackend};
///
/// let cache = DocumentCache::builder(Arc::new(MemoryBackend::new()))
///     .freshness_guard(false)
///     .build();
/// ```
pub struct DocumentCacheBuilder<B> {
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    freshness_guard: bool,
}

impl<B: DocumentBackend> DocumentCacheBuilder<B> {
    /// Create a builder around the remote backend.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            freshness_guard: true,
        }
    }

    /// Use a custom time source for entry timestamps and expiry.
    ///
    /// Default: system time
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reject fetch results older than what a realtime push already stored.
    ///
    /// When disabled, whichever write lands last wins.
    ///
    /// Default: `true`
    pub fn freshness_guard(mut self, enable: bool) -> Self {
        self.freshness_guard = enable;
        self
    }

    /// Build the cache with an empty store and no subscriptions.
    pub fn build(self) -> DocumentCache<B> {
        let store = Arc::new(CacheStore::new(self.clock));
        let subscriptions = SubscriptionRegistry::new(store.clone());
        DocumentCache {
            backend: self.backend,
            store,
            subscriptions,
            freshness_guard: self.freshness_guard,
        }
    }
}
