//! Bounded LRU with an explicit eviction callback
//!
//! Opened decoder pages hold native resources, so evicting one from the
//! cache must recycle it deterministically rather than rely on drop order.

use lru::LruCache;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use tracing::trace;

/// Default number of decoder pages kept open
pub const DEFAULT_PAGE_CAPACITY: usize = 16;

type EvictFn<K, V> = Box<dyn FnMut(K, V) + Send>;

/// LRU map that hands every evicted entry to a callback
pub struct EvictingLru<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
    on_evict: EvictFn<K, V>,
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V> EvictingLru<K, V> {
    /// Create a cache holding at most `capacity` entries (at least one)
    pub fn new<F>(capacity: usize, on_evict: F) -> Self
    where
        F: FnMut(K, V) + Send + 'static,
    {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            on_evict: Box::new(on_evict),
            evictions: 0,
        }
    }

    /// Insert `value`, evicting the least recently used entry when full
    ///
    /// A value already stored under `key` is replaced and passed to the
    /// eviction callback as well.
    pub fn insert(&mut self, key: K, value: V) {
        if let Some((old_key, old_value)) = self.entries.push(key, value) {
            self.evict(old_key, old_value);
        }
    }

    /// Look up `key`, creating the entry with `create` on a miss
    pub fn get_or_try_insert<E, F>(&mut self, key: K, create: F) -> Result<&mut V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if !self.entries.contains(&key) {
            let value = create()?;
            // Make room through the callback; the inner cache would drop it
            if self.entries.len() >= self.entries.cap().get() {
                if let Some((old_key, old_value)) = self.entries.pop_lru() {
                    self.evict(old_key, old_value);
                }
            }
            return Ok(self.entries.get_or_insert_mut(key, || value));
        }
        self.entries.try_get_or_insert_mut(key, create)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Remove `key` without running the eviction callback
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key)
    }

    /// Evict every entry through the callback, most stale first
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Some((key, value)) = self.entries.pop_lru() {
            self.evict(key, value);
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Entries evicted so far, including drained ones
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn evict(&mut self, key: K, value: V) {
        self.evictions += 1;
        trace!(evictions = self.evictions, "lru entry evicted");
        (self.on_evict)(key, value);
    }
}

impl<K: Hash + Eq, V> fmt::Debug for EvictingLru<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictingLru")
            .field("len", &self.entries.len())
            .field("capacity", &self.entries.cap())
            .field("evictions", &self.evictions)
            .finish()
    }
}
