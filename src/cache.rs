//! Small-Object Cache
//!
//! Bounded LRU of whole object bodies, keyed by (bucket, key). Each store
//! owns one instance. Every item is stamped with the record location it was
//! read from; a lookup only hits when the caller's index entry points at the
//! same record, so a stale body can never be served after an overwrite.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::index::IndexEntry;

/// Identifies the record a cached body came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheStamp {
    pub shard: usize,
    pub segment_id: u64,
    pub offset: u64,
}

impl From<&IndexEntry> for CacheStamp {
    fn from(entry: &IndexEntry) -> Self {
        Self {
            shard: entry.shard,
            segment_id: entry.segment_id,
            offset: entry.offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    bucket: String,
    key: String,
}

impl CacheKey {
    fn new(bucket: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

struct CachedObject {
    data: Bytes,
    stamp: CacheStamp,
    /// Logical clock value of the last access
    tick: u64,
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CachedObject>,
    /// tick → key, oldest first
    lru: BTreeMap<u64, CacheKey>,
    bytes: u64,
    clock: u64,
}

impl CacheInner {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CachedObject> {
        let item = self.entries.remove(key)?;
        self.lru.remove(&item.tick);
        self.bytes -= item.data.len() as u64;
        Some(item)
    }
}

/// LRU cache for small object bodies
pub struct SmallObjectCache {
    max_item: u64,
    capacity: u64,
    inner: Mutex<CacheInner>,
    stats: CacheStats,
}

impl SmallObjectCache {
    /// `max_item` is the largest body accepted; `capacity` the total byte
    /// budget. A zero capacity disables the cache.
    pub fn new(max_item: u64, capacity: u64) -> Self {
        Self {
            max_item: max_item.min(capacity),
            capacity,
            inner: Mutex::new(CacheInner::default()),
            stats: CacheStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0 && self.max_item > 0
    }

    /// Largest cacheable object size
    pub fn max_item(&self) -> u64 {
        self.max_item
    }

    /// Whether an object of `size` bytes would be accepted
    pub fn accepts(&self, size: u64) -> bool {
        self.is_enabled() && size <= self.max_item
    }

    /// Look up a body. Misses when the cached stamp differs from `stamp`
    /// (the item is dropped in that case).
    pub fn get(&self, bucket: &str, key: &str, stamp: CacheStamp) -> Option<Bytes> {
        if !self.is_enabled() {
            return None;
        }
        let cache_key = CacheKey::new(bucket, key);
        let mut inner = self.inner.lock();

        let current = inner.entries.get(&cache_key).map(|item| (item.stamp, item.tick));
        match current {
            Some((cached, old_tick)) if cached == stamp => {
                let tick = inner.next_tick();
                inner.lru.remove(&old_tick);
                inner.lru.insert(tick, cache_key.clone());
                let item = inner.entries.get_mut(&cache_key)?;
                item.tick = tick;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(item.data.clone())
            }
            Some(_) => {
                inner.remove(&cache_key);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a body, evicting least recently used items to stay within
    /// budget. Oversized bodies are ignored.
    pub fn put(&self, bucket: &str, key: &str, stamp: CacheStamp, data: Bytes) -> bool {
        let size = data.len() as u64;
        if !self.accepts(size) {
            return false;
        }
        let cache_key = CacheKey::new(bucket, key);
        let mut inner = self.inner.lock();
        inner.remove(&cache_key);

        while inner.bytes + size > self.capacity {
            let oldest = match inner.lru.iter().next() {
                Some((_, key)) => key.clone(),
                None => break,
            };
            inner.remove(&oldest);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }

        let tick = inner.next_tick();
        inner.lru.insert(tick, cache_key.clone());
        inner.bytes += size;
        inner.entries.insert(cache_key, CachedObject { data, stamp, tick });
        true
    }

    pub fn delete(&self, bucket: &str, key: &str) {
        if !self.is_enabled() {
            return;
        }
        self.inner.lock().remove(&CacheKey::new(bucket, key));
    }

    /// Drop every item belonging to `bucket`
    pub fn remove_bucket(&self, bucket: &str) {
        let mut inner = self.inner.lock();
        let doomed: Vec<CacheKey> = inner
            .entries
            .keys()
            .filter(|k| k.bucket == bucket)
            .cloned()
            .collect();
        for key in doomed {
            inner.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Bytes currently held
    pub fn bytes_used(&self) -> u64 {
        self.inner.lock().bytes
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
