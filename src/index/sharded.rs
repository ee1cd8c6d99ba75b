//! Sharded Index
//!
//! Key → latest record location, split across independently locked
//! partitions. A sorted copy of all keys is cached for range scans and only
//! rebuilt after the modification counter moves.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::IndexEntry;
use crate::key::key_hash;

type Partition = RwLock<HashMap<String, Arc<IndexEntry>>>;

/// Sorted key list and the modification count it was built at
struct SortedKeys {
    built_at: Option<u64>,
    keys: Arc<[String]>,
}

/// Partitioned key → entry map
pub struct ShardedIndex {
    partitions: Vec<Partition>,
    mod_count: AtomicU64,
    sorted: Mutex<SortedKeys>,
}

impl ShardedIndex {
    pub fn new(partitions: usize) -> Self {
        let partitions = partitions.max(1);
        Self {
            partitions: (0..partitions).map(|_| RwLock::new(HashMap::new())).collect(),
            mod_count: AtomicU64::new(0),
            sorted: Mutex::new(SortedKeys {
                built_at: None,
                keys: Arc::from(Vec::<String>::new()),
            }),
        }
    }

    fn partition(&self, key: &str) -> &Partition {
        &self.partitions[(key_hash(key) % self.partitions.len() as u64) as usize]
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn get(&self, key: &str) -> Option<Arc<IndexEntry>> {
        self.partition(key).read().get(key).cloned()
    }

    /// Insert or replace an entry, returning the previous one
    pub fn set(&self, key: &str, entry: IndexEntry) -> Option<Arc<IndexEntry>> {
        let mut part = self.partition(key).write();
        let prev = part.insert(key.to_string(), Arc::new(entry));
        // Bumped under the partition lock so a reader that can see this entry
        // also sees the new count.
        self.mod_count.fetch_add(1, Ordering::AcqRel);
        prev
    }

    pub fn delete(&self, key: &str) -> Option<Arc<IndexEntry>> {
        let mut part = self.partition(key).write();
        let prev = part.remove(key);
        if prev.is_some() {
            self.mod_count.fetch_add(1, Ordering::AcqRel);
        }
        prev
    }

    pub fn contains(&self, key: &str) -> bool {
        self.partition(key).read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(|p| p.read().is_empty())
    }

    /// Modification counter (advances on every effective set/delete)
    pub fn mod_count(&self) -> u64 {
        self.mod_count.load(Ordering::Acquire)
    }

    /// All keys in lexical order.
    ///
    /// Returns the cached list when nothing changed since it was built;
    /// otherwise rebuilds it once and shares it with every later caller.
    pub fn sorted_keys(&self) -> Arc<[String]> {
        let mut sorted = self.sorted.lock();
        let current = self.mod_count.load(Ordering::Acquire);
        if sorted.built_at == Some(current) {
            return Arc::clone(&sorted.keys);
        }

        let mut keys: Vec<String> = Vec::with_capacity(self.len());
        for part in &self.partitions {
            keys.extend(part.read().keys().cloned());
        }
        keys.sort_unstable();

        // Stamped with the count read before collecting: a change that raced
        // the collection forces another rebuild next time.
        sorted.keys = Arc::from(keys);
        sorted.built_at = Some(current);
        Arc::clone(&sorted.keys)
    }

    /// Keys starting with `prefix`, as a view into the sorted key cache
    pub fn keys_with_prefix(&self, prefix: &str) -> KeyRange {
        let keys = self.sorted_keys();
        let start = keys.partition_point(|k| k.as_str() < prefix);
        let end = match prefix_upper_bound(prefix.as_bytes()) {
            Some(upper) => start + keys[start..].partition_point(|k| k.as_bytes() < upper.as_slice()),
            None => keys.len(),
        };
        KeyRange {
            keys,
            range: start..end,
        }
    }

    /// Point-in-time copy of every entry
    pub fn snapshot(&self) -> BTreeMap<String, IndexEntry> {
        let mut out = BTreeMap::new();
        for part in &self.partitions {
            for (key, entry) in part.read().iter() {
                out.insert(key.clone(), IndexEntry::clone(entry));
            }
        }
        out
    }

    /// Remove every entry
    pub fn clear(&self) {
        for part in &self.partitions {
            part.write().clear();
        }
        self.mod_count.fetch_add(1, Ordering::AcqRel);
    }
}

/// Smallest byte string greater than every string starting with `prefix`.
///
/// Increments the last byte that is not `0xFF` and drops everything after
/// it. `None` means the range is unbounded (empty prefix or all `0xFF`).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let pos = prefix.iter().rposition(|&b| b != 0xFF)?;
    let mut upper = prefix[..=pos].to_vec();
    upper[pos] += 1;
    Some(upper)
}

/// A contiguous, sorted slice of the key cache
#[derive(Clone)]
pub struct KeyRange {
    keys: Arc<[String]>,
    range: Range<usize>,
}

impl KeyRange {
    pub fn as_slice(&self) -> &[String] {
        &self.keys[self.range.clone()]
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.as_slice().to_vec()
    }
}
