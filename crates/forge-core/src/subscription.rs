//! Realtime subscription registry.
//!
//! At most one live subscription exists per cache key. Registering a new one
//! cancels the previous handle before the new listener is set up. Values a
//! listener pushes are written straight into the cache with a fresh TTL,
//! with no freshness comparison: a push is always the newest value.

use crate::cache::CacheStore;
use crate::cancel::CancellationToken;
use crate::config::LogTarget;
use crate::error::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cancellation function of an external listener.
pub struct SubscriptionHandle {
    cancel: Box<dyn FnOnce() + Send + 'static>,
}

impl SubscriptionHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// A handle with nothing to tear down.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Stop the listener.
    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle").finish_non_exhaustive()
    }
}

/// Cancellation flag paired with a lock that pushes hold while writing.
///
/// Closing takes the lock exclusively, so once `close` returns no push is
/// mid-write and every later push sees the flag.
#[derive(Clone, Default)]
struct PushGate {
    token: CancellationToken,
    lock: Arc<RwLock<()>>,
}

impl PushGate {
    fn close(&self) {
        let _exclusive = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.token.cancel();
    }

    fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Hold the gate open for one write, or `None` if it is closed.
    fn enter(&self) -> Option<RwLockReadGuard<'_, ()>> {
        let guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        (!self.is_closed()).then_some(guard)
    }
}

/// Where a listener delivers what it receives.
///
/// Handed to the listener setup; the listener keeps it and calls `push` for
/// every new value and `report_error` for failures after setup.
pub struct SubscriptionSink<T> {
    key: Arc<str>,
    ttl: Duration,
    store: Arc<CacheStore<T>>,
    gate: PushGate,
}

impl<T> Clone for SubscriptionSink<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            ttl: self.ttl,
            store: self.store.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl<T: Clone> SubscriptionSink<T> {
    /// Cache key this sink writes to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the owning subscription has been cancelled.
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// Write a pushed value into the cache.
    ///
    /// Returns `false` if the subscription was already cancelled and the
    /// value was dropped. Cancellation waits for a push already writing, so
    /// nothing lands after `unsubscribe` returns.
    pub fn push(&self, value: T) -> bool {
        let Some(_open) = self.gate.enter() else {
            debug!(
                target: LogTarget::SUBSCRIPTION,
                key = %self.key,
                "dropped push for cancelled subscription"
            );
            return false;
        };
        debug!(target: LogTarget::SUBSCRIPTION, key = %self.key, "realtime update received");
        self.store.set(&self.key, value, self.ttl);
        true
    }

    /// Report an error raised by the listener after setup.
    ///
    /// Only logged: the subscription is not retried and the cached value,
    /// stale or not, stays until invalidated.
    pub fn report_error(&self, error: &dyn fmt::Display) {
        warn!(
            target: LogTarget::SUBSCRIPTION,
            key = %self.key,
            error = %error,
            "realtime listener error"
        );
    }
}

struct ActiveSubscription {
    handle: SubscriptionHandle,
    gate: PushGate,
}

impl ActiveSubscription {
    fn cancel(self) {
        self.gate.close();
        self.handle.cancel();
    }
}

/// Tracks one live subscription per cache key.
pub struct SubscriptionRegistry<T> {
    store: Arc<CacheStore<T>>,
    active: Mutex<HashMap<String, ActiveSubscription>>,
}

impl<T: Clone> SubscriptionRegistry<T> {
    /// Create a registry writing pushed values into `store`.
    pub fn new(store: Arc<CacheStore<T>>) -> Self {
        Self {
            store,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveSubscription>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `key`, superseding any existing subscription for it.
    ///
    /// The previous handle is cancelled before `setup` runs. If `setup`
    /// fails, its error is returned and nothing is registered.
    pub fn subscribe<F>(&self, key: &str, ttl: Duration, setup: F) -> Result<()>
    where
        F: FnOnce(SubscriptionSink<T>) -> Result<SubscriptionHandle>,
    {
        // Lock is released before any handle runs
        let previous = self.lock().remove(key);
        if let Some(previous) = previous {
            debug!(target: LogTarget::SUBSCRIPTION, key, "superseding existing subscription");
            previous.cancel();
        }

        let gate = PushGate::default();
        let sink = SubscriptionSink {
            key: Arc::from(key),
            ttl,
            store: self.store.clone(),
            gate: gate.clone(),
        };

        let handle = match setup(sink) {
            Ok(handle) => handle,
            Err(e) => {
                gate.close();
                warn!(target: LogTarget::SUBSCRIPTION, key, error = %e, "subscription setup failed");
                return Err(e);
            }
        };

        let raced = self
            .lock()
            .insert(key.to_string(), ActiveSubscription { handle, gate });
        if let Some(raced) = raced {
            debug!(
                target: LogTarget::SUBSCRIPTION,
                key,
                "cancelling subscription registered during setup"
            );
            raced.cancel();
        }

        info!(target: LogTarget::SUBSCRIPTION, key, "subscribed");
        Ok(())
    }

    /// Cancel and forget the subscription for `key`, if any.
    pub fn unsubscribe(&self, key: &str) -> bool {
        let removed = self.lock().remove(key);
        match removed {
            Some(subscription) => {
                subscription.cancel();
                info!(target: LogTarget::SUBSCRIPTION, key, "unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Cancel every subscription. Returns how many were cancelled.
    pub fn unsubscribe_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, subscription) in drained {
            subscription.cancel();
        }
        info!(target: LogTarget::SUBSCRIPTION, count, "unsubscribed all");
        count
    }

    pub fn is_subscribed(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ForgeError;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_millis(1_000);

    fn create_registry() -> (SubscriptionRegistry<u32>, Arc<CacheStore<u32>>, ManualClock) {
        let clock = ManualClock::new(0);
        let store = Arc::new(CacheStore::new(Arc::new(clock.clone())));
        (SubscriptionRegistry::new(store.clone()), store, clock)
    }

    fn counting_handle(counter: &Arc<AtomicU32>) -> SubscriptionHandle {
        let counter = counter.clone();
        SubscriptionHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_push_writes_into_cache() {
        let (registry, store, clock) = create_registry();
        let mut captured = None;

        registry
            .subscribe("tokens/t1", TTL, |sink| {
                captured = Some(sink);
                Ok(SubscriptionHandle::noop())
            })
            .unwrap();

        clock.set(500);
        let sink = captured.unwrap();
        assert_eq!(sink.key(), "tokens/t1");
        assert!(sink.push(7));

        let entry = store.get("tokens/t1").unwrap();
        assert_eq!(entry.data, 7);
        assert_eq!(entry.expiry, 1_500);
    }

    #[test]
    fn test_resubscribe_cancels_previous_before_setup() {
        let (registry, _, _) = create_registry();
        let first_cancels = Arc::new(AtomicU32::new(0));

        registry
            .subscribe("users/alice", TTL, |_| Ok(counting_handle(&first_cancels)))
            .unwrap();

        let observed_during_setup = {
            let first_cancels = first_cancels.clone();
            let mut observed = 0;
            registry
                .subscribe("users/alice", TTL, |_| {
                    observed = first_cancels.load(Ordering::SeqCst);
                    Ok(SubscriptionHandle::noop())
                })
                .unwrap();
            observed
        };

        assert_eq!(observed_during_setup, 1);
        assert_eq!(first_cancels.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sink_of_superseded_subscription_is_closed() {
        let (registry, store, _) = create_registry();
        let mut first_sink = None;

        registry
            .subscribe("k/1", TTL, |sink| {
                first_sink = Some(sink);
                Ok(SubscriptionHandle::noop())
            })
            .unwrap();
        registry
            .subscribe("k/1", TTL, |_| Ok(SubscriptionHandle::noop()))
            .unwrap();

        let first_sink = first_sink.unwrap();
        assert!(first_sink.is_closed());
        assert!(!first_sink.push(1));
        assert!(store.get("k/1").is_none());
    }

    #[test]
    fn test_setup_failure_registers_nothing() {
        let (registry, _, _) = create_registry();

        let result = registry.subscribe("k/1", TTL, |_| {
            Err(ForgeError::SubscriptionSetup {
                key: "k/1".into(),
                message: "rejected".into(),
            })
        });

        assert!(matches!(result, Err(ForgeError::SubscriptionSetup { .. })));
        assert!(!registry.is_subscribed("k/1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let (registry, _, _) = create_registry();
        let cancels = Arc::new(AtomicU32::new(0));
        registry
            .subscribe("k/1", TTL, |_| Ok(counting_handle(&cancels)))
            .unwrap();

        assert!(registry.unsubscribe("k/1"));
        assert!(!registry.unsubscribe("k/1"));
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_all_cancels_each_once() {
        let (registry, _, _) = create_registry();
        let counters: Vec<_> = (0..3).map(|_| Arc::new(AtomicU32::new(0))).collect();

        for (i, counter) in counters.iter().enumerate() {
            registry
                .subscribe(&format!("k/{}", i), TTL, |_| Ok(counting_handle(counter)))
                .unwrap();
        }

        assert_eq!(registry.unsubscribe_all(), 3);
        assert!(registry.is_empty());
        for counter in &counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }

        assert_eq!(registry.unsubscribe_all(), 0);
        for counter in &counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_no_push_lands_after_unsubscribe_returns() {
        let (registry, store, _) = create_registry();
        let mut captured = None;
        registry
            .subscribe("k/1", TTL, |sink| {
                captured = Some(sink);
                Ok(SubscriptionHandle::noop())
            })
            .unwrap();

        let sink = captured.unwrap();
        let pusher = std::thread::spawn(move || {
            let mut value = 0u32;
            while sink.push(value) {
                value = value.wrapping_add(1);
            }
        });

        while store.stats().writes == 0 {
            std::thread::yield_now();
        }
        assert!(registry.unsubscribe("k/1"));
        let writes_at_cancel = store.stats().writes;

        pusher.join().unwrap();
        assert_eq!(store.stats().writes, writes_at_cancel);
    }

    #[test]
    fn test_runtime_error_keeps_cached_value() {
        let (registry, store, _) = create_registry();
        let mut captured = None;
        registry
            .subscribe("k/1", TTL, |sink| {
                captured = Some(sink);
                Ok(SubscriptionHandle::noop())
            })
            .unwrap();

        let sink = captured.unwrap();
        sink.push(1);
        sink.report_error(&"permission denied");

        assert_eq!(store.get_valid("k/1"), Some(1));
        assert!(registry.is_subscribed("k/1"));
    }
}
