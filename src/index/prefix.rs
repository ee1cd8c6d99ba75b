//! Prefix Index
//!
//! Groups keys by their leading path segments so directory-style listings
//! do not have to range-scan the whole key space.
//!
//! ```text
//! depth = 2
//!   "a/b.txt"    → "a/"
//!   "a/c/d.txt"  → "a/", "a/c/"
//!   "e.txt"      → (none)
//! ```

use std::collections::HashMap;

use parking_lot::RwLock;

/// Directory prefix → sorted, deduplicated keys
pub struct PrefixIndex {
    depth: usize,
    buckets: RwLock<HashMap<String, Vec<String>>>,
}

impl PrefixIndex {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, key: &str) {
        if self.depth == 0 {
            return;
        }
        let mut buckets = self.buckets.write();
        for prefix in prefixes_of(key, self.depth) {
            let keys = buckets.entry(prefix.to_string()).or_default();
            if let Err(pos) = keys.binary_search_by(|k| k.as_str().cmp(key)) {
                keys.insert(pos, key.to_string());
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if self.depth == 0 {
            return;
        }
        let mut buckets = self.buckets.write();
        for prefix in prefixes_of(key, self.depth) {
            let now_empty = match buckets.get_mut(prefix) {
                Some(keys) => {
                    if let Ok(pos) = keys.binary_search_by(|k| k.as_str().cmp(key)) {
                        keys.remove(pos);
                    }
                    keys.is_empty()
                }
                None => false,
            };
            if now_empty {
                buckets.remove(prefix);
            }
        }
    }

    /// Keys filed exactly under `prefix`. Only directory prefixes (ending
    /// in `/`) are tracked.
    pub fn get(&self, prefix: &str) -> Option<Vec<String>> {
        if !prefix.ends_with('/') {
            return None;
        }
        self.buckets.read().get(prefix).cloned()
    }

    /// A superset of the keys starting with `prefix`, taken from the
    /// closest tracked directory prefix at or above it. Callers filter the
    /// result against the real prefix.
    pub fn candidates(&self, prefix: &str) -> Option<Vec<String>> {
        let buckets = self.buckets.read();
        let mut end = prefix.len();
        while let Some(pos) = prefix[..end].rfind('/') {
            if let Some(keys) = buckets.get(&prefix[..=pos]) {
                return Some(keys.clone());
            }
            end = pos;
        }
        None
    }

    /// Replace the whole index with one built from `keys`
    pub fn rebuild<'k>(&self, keys: impl IntoIterator<Item = &'k str>) {
        let mut fresh: HashMap<String, Vec<String>> = HashMap::new();
        if self.depth > 0 {
            for key in keys {
                for prefix in prefixes_of(key, self.depth) {
                    fresh.entry(prefix.to_string()).or_default().push(key.to_string());
                }
            }
        }
        for keys in fresh.values_mut() {
            keys.sort_unstable();
            keys.dedup();
        }
        *self.buckets.write() = fresh;
    }

    /// Number of tracked prefixes
    pub fn prefix_count(&self) -> usize {
        self.buckets.read().len()
    }
}

/// Directory prefixes of `key` (each ending in `/`), shallowest first
fn prefixes_of(key: &str, depth: usize) -> impl Iterator<Item = &str> {
    key.match_indices('/')
        .take(depth)
        .map(move |(pos, _)| &key[..=pos])
}
