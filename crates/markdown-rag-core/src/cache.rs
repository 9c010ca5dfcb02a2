//! Time-boxed, size-bounded result cache.
//!
//! [`TtlCache`] keeps each value for a fixed time-to-live measured by an
//! injected [`Clock`]. Expired entries behave exactly like absent ones and
//! are dropped when touched. When the cache is full the least recently
//! used entry is evicted.
//!
//! The cache is `Sync`: callers share one instance behind an `Arc`.
//! Entries are never invalidated by writes to the underlying data.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default time-to-live for cached search results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of cached entries.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Used to test expiry.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + *offset
    }
}

/// An LRU map whose entries also expire after `ttl`.
pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<LruCache<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            clock,
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, (Instant, V)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return a clone of the live value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some((stored_at, value)) if now.saturating_duration_since(*stored_at) < self.ttl => {
                return Some(value.clone());
            }
            Some(_) => {}
            None => return None,
        }
        entries.pop(key);
        None
    }

    /// Store `value` under `key`, stamping it with the current time. A full
    /// cache drops its least recently used entry.
    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        self.lock().put(key, (now, value));
    }

    /// Number of stored entries, including any not yet purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
