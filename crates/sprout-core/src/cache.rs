//! Dependency-keyed memoization of live computations
//!
//! A [`DependencyCache`] shares the output of an expensive computation among
//! every caller presenting an elementwise-equal [`Fingerprint`]. At most one
//! computation per fingerprint is in flight at a time. When the last
//! subscriber of an entry goes away its computation is cancelled, but the
//! entry keeps its last value; a later subscriber sees that value at once and
//! restarts the computation if it had not finished. Entries are evicted when
//! idle for longer than the configured timeout or when the cache grows past
//! its capacity.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::stream::{follow, until_error};

/// One element of a dependency fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Primitive {
    /// Bit pattern used for equality and hashing; `-0.0` and `0.0` coincide.
    fn number_bits(value: f64) -> u64 {
        if value == 0.0 { 0 } else { value.to_bits() }
    }
}

impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Primitive::Null, Primitive::Null) => true,
            (Primitive::Boolean(l), Primitive::Boolean(r)) => l == r,
            (Primitive::Number(l), Primitive::Number(r)) => {
                Self::number_bits(*l) == Self::number_bits(*r)
            }
            (Primitive::String(l), Primitive::String(r)) => l == r,
            _ => false,
        }
    }
}

impl Eq for Primitive {}

impl Hash for Primitive {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Primitive::Null => {}
            Primitive::Boolean(value) => value.hash(state),
            Primitive::Number(value) => Self::number_bits(*value).hash(state),
            Primitive::String(value) => value.hash(state),
        }
    }
}

impl From<f64> for Primitive {
    fn from(value: f64) -> Self {
        Primitive::Number(value)
    }
}

impl From<bool> for Primitive {
    fn from(value: bool) -> Self {
        Primitive::Boolean(value)
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::String(value.to_string())
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::String(value)
    }
}

/// Ordered list of dependency values identifying one computation
pub type Fingerprint = Vec<Primitive>;

/// Failure reported by a cached computation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cached computation failed: {message}")]
pub struct CacheComputeError {
    pub message: String,
}

impl CacheComputeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Item produced by a cached computation
pub type CacheItem<V> = Result<V, CacheComputeError>;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Maximum number of entries before least-recently-used eviction
    pub capacity: usize,
    /// Seconds an unobserved entry may stay untouched before it is evicted
    pub idle_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            idle_timeout_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub computations: u64,
    pub hits: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Get cache utilization as a percentage
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.size as f64 / self.capacity as f64) * 100.0
        }
    }
}

struct CacheEntry<V> {
    /// Never polled; cloned for each subscriber so it replays the latest item
    receiver: watch::Receiver<Option<CacheItem<V>>>,
    driver: AbortHandle,
    /// Set by the driver once the computation has run to its end
    completed: Arc<AtomicBool>,
    observers: Arc<AtomicUsize>,
    last_access: Instant,
    generation: u64,
}

impl<V> CacheEntry<V> {
    fn observer_count(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }

    fn is_idle(&self, timeout: Duration) -> bool {
        self.observer_count() == 0 && self.last_access.elapsed() >= timeout
    }

    /// Cancelled by its last subscriber before the computation finished
    fn is_interrupted(&self) -> bool {
        self.observer_count() == 0 && !self.completed.load(Ordering::SeqCst)
    }
}

impl<V> Drop for CacheEntry<V> {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

type Entries<V> = DashMap<Fingerprint, CacheEntry<V>>;

/// Held by every subscriber stream; the last one dropped cancels the
/// computation of the entry it subscribed to.
struct Observer<V> {
    entries: Weak<Entries<V>>,
    fingerprint: Fingerprint,
    observers: Arc<AtomicUsize>,
}

impl<V> Drop for Observer<V> {
    fn drop(&mut self) {
        if self.observers.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        // Re-checked under the entry lock: a concurrent attach may have
        // subscribed again since the count dropped to zero
        if let Some(entry) = entries.get(&self.fingerprint) {
            if Arc::ptr_eq(&entry.observers, &self.observers) && entry.observer_count() == 0 {
                entry.driver.abort();
                trace!("last subscriber left, cancelled {:?}", self.fingerprint);
            }
        }
    }
}

/// Session-scoped memoization table keyed by dependency fingerprints
pub struct DependencyCache<V> {
    entries: Arc<Entries<V>>,
    config: CacheConfig,
    generation: AtomicU64,
    computations: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
}

impl<V> std::fmt::Debug for DependencyCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<V> Default for DependencyCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V> DependencyCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
            generation: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Subscribe to the computation for `fingerprint`, starting it with
    /// `compute` only when no entry exists yet or when the entry's
    /// computation was cancelled before it finished.
    ///
    /// The returned stream first replays the latest item, then follows the
    /// computation until it ends or fails. Dropping the last stream of an
    /// entry cancels its computation. `compute` runs while the entry is
    /// locked and must not call back into this cache.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime.
    pub fn attach<S>(
        &self,
        fingerprint: Fingerprint,
        compute: impl FnOnce() -> S,
    ) -> BoxStream<'static, CacheItem<V>>
    where
        S: Stream<Item = CacheItem<V>> + Send + 'static,
    {
        self.evict_expired();

        let (receiver, observers) = match self.entries.entry(fingerprint.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_interrupted() {
                    self.computations.fetch_add(1, Ordering::Relaxed);
                    debug!("resuming cancelled computation {:?}", fingerprint);
                    let last = entry.receiver.borrow().clone();
                    let resumed = self.spawn_entry(fingerprint.clone(), compute(), last);
                    *entry = resumed;
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!("cache hit for {:?}", fingerprint);
                }
                entry.last_access = Instant::now();
                entry.observers.fetch_add(1, Ordering::SeqCst);
                (entry.receiver.clone(), Arc::clone(&entry.observers))
            }
            Entry::Vacant(vacant) => {
                self.computations.fetch_add(1, Ordering::Relaxed);
                debug!("cache miss, computing {:?}", fingerprint);
                let entry = self.spawn_entry(fingerprint.clone(), compute(), None);
                entry.observers.fetch_add(1, Ordering::SeqCst);
                let handles = (entry.receiver.clone(), Arc::clone(&entry.observers));
                vacant.insert(entry);
                handles
            }
        };

        self.evict_over_capacity();

        let observer = Observer {
            entries: Arc::downgrade(&self.entries),
            fingerprint,
            observers,
        };
        let observed = follow(receiver)
            .map(move |item| {
                let _observer = &observer;
                item
            })
            .boxed();
        until_error(observed)
    }

    /// Start `computation` on its own task. `last` seeds the channel so new
    /// subscribers of a resumed entry replay it immediately.
    fn spawn_entry<S>(
        &self,
        fingerprint: Fingerprint,
        computation: S,
        last: Option<CacheItem<V>>,
    ) -> CacheEntry<V>
    where
        S: Stream<Item = CacheItem<V>> + Send + 'static,
    {
        let (sender, receiver) = watch::channel(None);
        if last.is_some() {
            sender.send_replace(last);
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let entries = Arc::downgrade(&self.entries);
        let completed = Arc::new(AtomicBool::new(false));
        let finished = Arc::clone(&completed);

        let task = tokio::spawn(async move {
            let mut computation = Box::pin(computation);
            while let Some(item) = computation.next().await {
                let failed = item.is_err();
                sender.send_replace(Some(item));
                if failed {
                    // Purge so the next attach with this fingerprint retries
                    if let Some(entries) = entries.upgrade() {
                        entries.remove_if(&fingerprint, |_, entry| entry.generation == generation);
                    }
                    debug!("cached computation failed, purged {:?}", fingerprint);
                    break;
                }
            }
            finished.store(true, Ordering::SeqCst);
        });

        CacheEntry {
            receiver,
            driver: task.abort_handle(),
            completed,
            observers: Arc::new(AtomicUsize::new(0)),
            last_access: Instant::now(),
            generation,
        }
    }

    /// Wrap a computation so every call is routed through this cache.
    pub fn cached<I, D, C>(self: &Arc<Self>, get_dependencies: D, compute: C) -> Cached<I, V>
    where
        D: Fn(&I) -> Fingerprint + Send + Sync + 'static,
        C: Fn(I) -> BoxStream<'static, CacheItem<V>> + Send + Sync + 'static,
    {
        Cached {
            cache: Arc::clone(self),
            get_dependencies: Box::new(get_dependencies),
            compute: Box::new(compute),
            current: Mutex::new(None),
        }
    }

    /// Evict entries that have been unobserved and untouched for longer than
    /// the idle timeout. Returns the number of evicted entries.
    pub fn evict_expired(&self) -> usize {
        let timeout = self.config.idle_timeout();
        let mut evicted = 0usize;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_idle(timeout);
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!("evicted {} idle cache entries", evicted);
        }
        evicted
    }

    /// Evict least-recently-used unobserved entries while over capacity.
    ///
    /// Entries with live subscribers are never evicted here, so the cache may
    /// temporarily hold more than `capacity` entries.
    fn evict_over_capacity(&self) {
        while self.entries.len() > self.config.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|entry| entry.observer_count() == 0)
                .min_by_key(|entry| entry.last_access)
                .map(|entry| entry.key().clone());

            let Some(key) = victim else {
                debug!("cache over capacity but every entry is observed");
                break;
            };
            if self
                .entries
                .remove_if(&key, |_, entry| entry.observer_count() == 0)
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!("evicted least recently used entry {:?}", key);
            }
        }
    }

    /// Drop the entry for `fingerprint` if nobody observes it anymore.
    pub fn release(&self, fingerprint: &Fingerprint) -> bool {
        let released = self
            .entries
            .remove_if(fingerprint, |_, entry| entry.observer_count() == 0)
            .is_some();
        if released {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        released
    }

    /// Drop the entry for `fingerprint` unconditionally, cancelling its computation.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.remove(fingerprint).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            capacity: self.config.capacity,
            computations: self.computations.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// A computation routed through a [`DependencyCache`].
///
/// Remembers the fingerprint of its latest call; when the fingerprint
/// changes, the superseded entry is released once it is unobserved.
pub struct Cached<I, V> {
    cache: Arc<DependencyCache<V>>,
    get_dependencies: Box<dyn Fn(&I) -> Fingerprint + Send + Sync>,
    compute: Box<dyn Fn(I) -> BoxStream<'static, CacheItem<V>> + Send + Sync>,
    current: Mutex<Option<Fingerprint>>,
}

impl<I, V> Cached<I, V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn call(&self, input: I) -> BoxStream<'static, CacheItem<V>> {
        let fingerprint = (self.get_dependencies)(&input);
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(fingerprint.clone());

        let output = self
            .cache
            .attach(fingerprint.clone(), || (self.compute)(input));

        if let Some(previous) = previous.filter(|previous| *previous != fingerprint) {
            self.cache.release(&previous);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::AtomicUsize;

    fn counting(
        counter: &Arc<AtomicUsize>,
    ) -> impl Fn(f64) -> BoxStream<'static, CacheItem<f64>> + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |input: f64| {
            counter.fetch_add(1, Ordering::SeqCst);
            stream::iter(vec![Ok(input * 2.0)]).boxed()
        }
    }

    #[tokio::test]
    async fn test_equal_fingerprints_compute_once() {
        let cache = Arc::new(DependencyCache::new(CacheConfig::default()));
        let counter = Arc::new(AtomicUsize::new(0));
        let cached = cache.cached(|input: &f64| vec![Primitive::from(*input)], counting(&counter));

        let first: Vec<CacheItem<f64>> = cached.call(2.0).collect().await;
        let second: Vec<CacheItem<f64>> = cached.call(2.0).collect().await;

        assert_eq!(first, vec![Ok(4.0)]);
        assert_eq!(second, vec![Ok(4.0)]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_changed_fingerprint_supersedes() {
        let cache = Arc::new(DependencyCache::new(CacheConfig::default()));
        let counter = Arc::new(AtomicUsize::new(0));
        let cached = cache.cached(|input: &f64| vec![Primitive::from(*input)], counting(&counter));

        let _: Vec<_> = cached.call(1.0).collect().await;
        let changed: Vec<_> = cached.call(3.0).collect().await;

        assert_eq!(changed, vec![Ok(6.0)]);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_error_reaches_subscribers_and_entry_is_retried() {
        let cache: DependencyCache<f64> = DependencyCache::new(CacheConfig::default());
        let counter = Arc::new(AtomicUsize::new(0));
        let fingerprint = vec![Primitive::from("mesh")];

        let compute = || {
            counter.fetch_add(1, Ordering::SeqCst);
            stream::iter(vec![Err(CacheComputeError::new("unavailable"))])
        };
        let items: Vec<_> = cache.attach(fingerprint.clone(), compute).collect().await;
        assert_eq!(items, vec![Err(CacheComputeError::new("unavailable"))]);

        // The driver purges the failed entry once it has published the error
        for _ in 0..100 {
            if cache.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cache.is_empty());

        let compute = || {
            counter.fetch_add(1, Ordering::SeqCst);
            stream::iter(vec![Ok(1.0)])
        };
        let retried: Vec<_> = cache.attach(fingerprint, compute).collect().await;
        assert_eq!(retried, vec![Ok(1.0)]);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_capacity_eviction_cancels_computation() {
        let cache: DependencyCache<f64> = DependencyCache::new(CacheConfig {
            capacity: 1,
            idle_timeout_secs: 3600,
        });
        let (dropped_tx, dropped_rx) = tokio::sync::oneshot::channel::<()>();

        let first = cache.attach(vec![Primitive::from(1.0)], move || {
            stream::pending::<CacheItem<f64>>().map(move |item| {
                let _guard = &dropped_tx;
                item
            })
        });
        drop(first);

        let _second = cache.attach(vec![Primitive::from(2.0)], || stream::pending());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 1);

        let cancelled = tokio::time::timeout(Duration::from_secs(1), dropped_rx).await;
        assert!(matches!(cancelled, Ok(Err(_))));
    }

    fn ticking(ticks: &Arc<AtomicUsize>) -> BoxStream<'static, CacheItem<f64>> {
        let ticks = Arc::clone(ticks);
        stream::unfold(ticks, |ticks| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let count = ticks.fetch_add(1, Ordering::SeqCst) + 1;
            Some((Ok(count as f64), ticks))
        })
        .boxed()
    }

    #[tokio::test]
    async fn test_last_unsubscribe_cancels_computation() {
        let cache: DependencyCache<f64> = DependencyCache::new(CacheConfig::default());
        let ticks = Arc::new(AtomicUsize::new(0));
        let fingerprint = vec![Primitive::from("clock")];

        let mut subscriber = cache.attach(fingerprint.clone(), || ticking(&ticks));
        let first = subscriber.next().await;
        assert!(matches!(first, Some(Ok(_))));
        drop(subscriber);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stopped_at = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), stopped_at);

        // The entry survives with its last value until it is evicted
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_entry_replays_last_value_and_resumes() {
        let cache: DependencyCache<f64> = DependencyCache::new(CacheConfig::default());
        let ticks = Arc::new(AtomicUsize::new(0));
        let fingerprint = vec![Primitive::from("clock")];

        let mut subscriber = cache.attach(fingerprint.clone(), || ticking(&ticks));
        let Some(Ok(last)) = subscriber.next().await else {
            panic!("expected a first tick");
        };
        drop(subscriber);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut resumed = cache.attach(fingerprint, || ticking(&ticks));
        let replayed = resumed.next().await;
        assert!(matches!(replayed, Some(Ok(value)) if value >= last));
        let next = resumed.next().await;
        assert!(matches!(next, Some(Ok(value)) if value > last));
        assert_eq!(cache.stats().computations, 2);
    }

    #[tokio::test]
    async fn test_idle_entries_expire() {
        let cache: DependencyCache<f64> = DependencyCache::new(CacheConfig {
            capacity: 16,
            idle_timeout_secs: 0,
        });
        let observed = cache.attach(vec![Primitive::Null], || stream::pending());
        assert_eq!(cache.evict_expired(), 0);
        drop(observed);
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_primitive_equality_is_strict() {
        assert_eq!(Primitive::from(0.0), Primitive::from(-0.0));
        assert_ne!(Primitive::from(1.0), Primitive::from("1"));
        assert_ne!(Primitive::from(true), Primitive::from(1.0));
    }
}
