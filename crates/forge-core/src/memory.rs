//! In-process document store.
//!
//! Implements [`DocumentBackend`] over plain maps, pushes changes to live
//! listeners, and counts reads. Faults can be injected to exercise retry and
//! subscription error paths.

use crate::backend::{DocumentBackend, SubscriptionTarget};
use crate::config::LogTarget;
use crate::document::{CachedValue, Document};
use crate::error::{ForgeError, Result};
use crate::query::{apply_constraints, QueryConstraint};
use crate::subscription::{SubscriptionHandle, SubscriptionSink};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

type Collections = HashMap<String, BTreeMap<String, Value>>;

struct Listener {
    target: SubscriptionTarget,
    sink: SubscriptionSink<CachedValue>,
}

type Listeners = Arc<Mutex<HashMap<u64, Listener>>>;

fn lock_listeners(listeners: &Mutex<HashMap<u64, Listener>>) -> MutexGuard<'_, HashMap<u64, Listener>> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Document store held in memory.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<Collections>,
    listeners: Listeners,
    next_listener_id: AtomicU64,
    /// Reads served or attempted (documents and queries).
    reads: AtomicU64,
    /// Reads that will fail with `Unavailable` before reads succeed again.
    pending_failures: AtomicU32,
    denied: RwLock<HashSet<String>>,
    reject_subscriptions: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend preloaded with `collections` (`name -> id -> data`).
    pub fn from_collections(collections: Collections) -> Self {
        Self {
            collections: RwLock::new(collections),
            ..Self::default()
        }
    }

    /// Builder-style insert, for setting up fixtures.
    pub fn with_document(self, collection: &str, id: &str, data: Value) -> Self {
        self.put_document(collection, id, data);
        self
    }

    /// Create or replace a document and notify listeners.
    pub fn put_document(&self, collection: &str, id: &str, data: Value) {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        debug!(target: LogTarget::BACKEND, collection, id, "document written");
        self.notify(collection, id);
    }

    /// Delete a document and notify listeners. Returns whether it existed.
    pub fn delete_document(&self, collection: &str, id: &str) -> bool {
        let removed = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some());
        if removed {
            debug!(target: LogTarget::BACKEND, collection, id, "document deleted");
            self.notify(collection, id);
        }
        removed
    }

    /// Make the next `count` reads fail with `ForgeError::Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Deny reads on `collection`. Listeners on it report runtime errors.
    pub fn deny_collection(&self, collection: &str) {
        self.denied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string());
    }

    /// Make listener setup fail.
    pub fn reject_subscriptions(&self, reject: bool) {
        self.reject_subscriptions.store(reject, Ordering::SeqCst);
    }

    /// Delay every read by `latency` after its snapshot is taken.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of reads received so far, failed ones included.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        lock_listeners(&self.listeners).len()
    }

    fn is_denied(&self, collection: &str) -> bool {
        self.denied
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(collection)
    }

    /// Common preamble of every read: count it and apply injected faults.
    fn begin_read(&self, path: &str) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(target: LogTarget::BACKEND, path, "injected read failure");
            return Err(ForgeError::Unavailable {
                message: format!("backend unavailable while reading {}", path),
            });
        }
        Ok(())
    }

    fn check_access(&self, collection: &str, path: &str) -> Result<()> {
        if self.is_denied(collection) {
            return Err(ForgeError::PermissionDenied {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        let millis = self.latency_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn snapshot(&self, target: &SubscriptionTarget) -> CachedValue {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        match target {
            SubscriptionTarget::Document { collection, id } => CachedValue::Document(
                collections
                    .get(collection)
                    .and_then(|docs| docs.get(id))
                    .map(|data| Document::new(id.clone(), data.clone())),
            ),
            SubscriptionTarget::Query {
                collection,
                constraints,
            } => CachedValue::Documents(apply_constraints(
                Self::documents_of(&collections, collection),
                constraints,
            )),
        }
    }

    fn documents_of(collections: &Collections, collection: &str) -> Vec<Document> {
        collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Push fresh snapshots to the listeners affected by a write to
    /// `collection/id`: that document's listeners and every query on the
    /// collection.
    fn notify(&self, collection: &str, id: &str) {
        let targets: Vec<(SubscriptionTarget, SubscriptionSink<CachedValue>)> =
            lock_listeners(&self.listeners)
                .values()
                .filter(|listener| listener.target.is_affected_by(collection, id))
                .map(|listener| (listener.target.clone(), listener.sink.clone()))
                .collect();

        if self.is_denied(collection) {
            return;
        }

        for (target, sink) in targets {
            sink.push(self.snapshot(&target));
        }
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let path = format!("{}/{}", collection, id);
        self.begin_read(&path)?;
        self.check_access(collection, &path)?;

        let document = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone()));

        self.simulate_latency().await;
        Ok(document)
    }

    async fn execute_query(
        &self,
        collection: &str,
        constraints: &[QueryConstraint],
    ) -> Result<Vec<Document>> {
        self.begin_read(collection)?;
        self.check_access(collection, collection)?;

        let documents = {
            let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
            Self::documents_of(&collections, collection)
        };
        let results = apply_constraints(documents, constraints);

        self.simulate_latency().await;
        Ok(results)
    }

    fn subscribe(
        &self,
        target: SubscriptionTarget,
        sink: SubscriptionSink<CachedValue>,
    ) -> Result<SubscriptionHandle> {
        if self.reject_subscriptions.load(Ordering::SeqCst) {
            return Err(ForgeError::SubscriptionSetup {
                key: sink.key().to_string(),
                message: "listener rejected by backend".to_string(),
            });
        }

        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        lock_listeners(&self.listeners).insert(
            id,
            Listener {
                target: target.clone(),
                sink: sink.clone(),
            },
        );
        debug!(target: LogTarget::BACKEND, listener = id, key = sink.key(), "listener attached");

        // Listeners fire once with the current state right after attaching
        if self.is_denied(target.collection()) {
            sink.report_error(&ForgeError::PermissionDenied {
                path: sink.key().to_string(),
            });
        } else {
            sink.push(self.snapshot(&target));
        }

        let listeners = self.listeners.clone();
        Ok(SubscriptionHandle::new(move || {
            lock_listeners(&listeners).remove(&id);
            debug!(target: LogTarget::BACKEND, listener = id, "listener detached");
        }))
    }
}
