//! Lookup caching and warm decoder-handle pooling.
//!
//! Two small components with one purpose: avoid repeating work on the hot
//! path of filesystem callbacks.
//!
//! [`EntryCache`] is a bounded LRU of recent `lookup` results, including
//! negative ones (a kernel will happily stat the same absent path thousands
//! of times).
//!
//! [`CursorPool`] caches positioned decoder cursors. Acquisition picks the
//! cursor with the greatest position at or before the target so the caller
//! pays only for the forward skip, not a restart from the last checkpoint.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::source::FileEntry;

/// Statistics for pool and cache usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Times an existing handle was reused.
    pub hits: u64,
    /// Times a fresh handle had to be created.
    pub misses: u64,
}

impl PoolStats {
    /// Returns the hit ratio over all acquisitions.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A pool of warm positioned handles.
///
/// Handles are removed from the pool while in use, so a handle is never
/// touched by two threads at once; distinct handles progress independently.
pub struct CursorPool<T> {
    slots: Mutex<Vec<T>>,
    capacity: usize,
    stats: Mutex<PoolStats>,
}

impl<T> CursorPool<T> {
    /// Creates a pool holding up to `capacity` idle handles.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Takes the handle best positioned for reading at `target`: the one
    /// with the greatest `position(handle) <= target`. Returns `None` when
    /// no pooled handle qualifies and the caller should build a cold one.
    pub fn acquire(&self, target: u64, position: impl Fn(&T) -> u64) -> Option<T> {
        let mut slots = self.slots.lock().expect("cursor pool poisoned");
        let best = slots
            .iter()
            .enumerate()
            .filter(|(_, handle)| position(handle) <= target)
            .max_by_key(|(_, handle)| position(handle))
            .map(|(i, _)| i);
        let mut stats = self.stats.lock().expect("cursor pool poisoned");
        match best {
            Some(i) => {
                stats.hits += 1;
                Some(slots.swap_remove(i))
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Returns a handle to the pool. The oldest handle is dropped when the
    /// pool is full.
    pub fn release(&self, handle: T) {
        let mut slots = self.slots.lock().expect("cursor pool poisoned");
        if slots.len() >= self.capacity {
            slots.remove(0);
        }
        slots.push(handle);
    }

    /// Number of idle handles.
    pub fn idle(&self) -> usize {
        self.slots.lock().expect("cursor pool poisoned").len()
    }

    /// Drops all idle handles.
    pub fn clear(&self) {
        self.slots.lock().expect("cursor pool poisoned").clear();
    }

    /// Returns a snapshot of the pool statistics.
    pub fn stats(&self) -> PoolStats {
        *self.stats.lock().expect("cursor pool poisoned")
    }
}

/// A bounded LRU of recent lookup results, negatives included.
pub struct EntryCache {
    entries: Mutex<LruCache<String, Option<FileEntry>>>,
    stats: Mutex<PoolStats>,
}

impl EntryCache {
    /// Creates a cache holding up to `capacity` paths.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Returns the cached result for `path`, if present.
    ///
    /// The outer `Option` is the cache hit; the inner one is the lookup
    /// result itself (`None` = known-absent path).
    pub fn get(&self, path: &str) -> Option<Option<FileEntry>> {
        let mut entries = self.entries.lock().expect("entry cache poisoned");
        let hit = entries.get(path).cloned();
        let mut stats = self.stats.lock().expect("entry cache poisoned");
        match hit {
            Some(_) => stats.hits += 1,
            None => stats.misses += 1,
        }
        hit
    }

    /// Records a lookup result.
    pub fn put(&self, path: &str, entry: Option<FileEntry>) {
        self.entries
            .lock()
            .expect("entry cache poisoned")
            .put(path.to_string(), entry);
    }

    /// Forgets a path (used by the overlay after writes).
    pub fn invalidate(&self, path: &str) {
        self.entries
            .lock()
            .expect("entry cache poisoned")
            .pop(path);
    }

    /// Forgets everything.
    pub fn clear(&self) {
        self.entries.lock().expect("entry cache poisoned").clear();
    }

    /// Returns a snapshot of the cache statistics.
    pub fn stats(&self) -> PoolStats {
        *self.stats.lock().expect("entry cache poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_prefers_closest_earlier_position() {
        let pool: CursorPool<u64> = CursorPool::new(4);
        pool.release(10);
        pool.release(50);
        pool.release(30);

        let got = pool.acquire(40, |&p| p).unwrap();
        assert_eq!(got, 30);
        // 30 was removed; next-best for 40 is now 10.
        let got = pool.acquire(40, |&p| p).unwrap();
        assert_eq!(got, 10);
    }

    #[test]
    fn test_pool_rejects_past_positions() {
        let pool: CursorPool<u64> = CursorPool::new(4);
        pool.release(100);
        assert!(pool.acquire(50, |&p| p).is_none());
        // The handle positioned past the target stays pooled.
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_pool_capacity_evicts_oldest() {
        let pool: CursorPool<u64> = CursorPool::new(2);
        pool.release(1);
        pool.release(2);
        pool.release(3);
        assert_eq!(pool.idle(), 2);
        // 1 was evicted.
        assert!(pool.acquire(1, |&p| p).is_none());
        assert!(pool.acquire(3, |&p| p).is_some());
    }

    #[test]
    fn test_pool_stats() {
        let pool: CursorPool<u64> = CursorPool::new(2);
        assert!(pool.acquire(10, |&p| p).is_none());
        pool.release(5);
        assert!(pool.acquire(10, |&p| p).is_some());
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_entry_cache_negative_results() {
        let cache = EntryCache::new(8);
        assert!(cache.get("/missing").is_none());
        cache.put("/missing", None);
        assert_eq!(cache.get("/missing"), Some(None));
    }

    #[test]
    fn test_entry_cache_invalidate() {
        let cache = EntryCache::new(8);
        cache.put("/a", None);
        cache.invalidate("/a");
        assert!(cache.get("/a").is_none());
    }
}
