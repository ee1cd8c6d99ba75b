//! Index Module
//!
//! In-memory view of "where is the latest value of each key". The log is
//! authoritative; everything here can be rebuilt by replaying it.
//!
//! ## Components
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  KeyIndex                    │
//! │  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │  ShardedIndex    │  │   PrefixIndex    │  │
//! │  │  N partitions    │  │  "a/" → [keys]   │  │
//! │  │  + sorted cache  │  │  "a/c/" → [keys] │  │
//! │  └──────────────────┘  └──────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

mod prefix;
mod sharded;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::segment::RecordLocation;

pub use prefix::PrefixIndex;
pub use sharded::{prefix_upper_bound, KeyRange, ShardedIndex};

/// Location and metadata of the latest `Put` for a key.
///
/// Entries are immutable once published; an update replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub shard: usize,
    pub segment_id: u64,
    /// Offset of the first data byte within the segment
    pub offset: u64,
    pub size: u64,
    pub content_type: String,
    pub updated_unix_ns: i64,
    pub checksum: u32,
}

impl IndexEntry {
    pub fn from_location(location: &RecordLocation, content_type: &str, updated_unix_ns: i64) -> Self {
        Self {
            shard: location.shard,
            segment_id: location.segment_id,
            offset: location.data_offset,
            size: location.data_len,
            content_type: content_type.to_string(),
            updated_unix_ns,
            checksum: location.checksum,
        }
    }

    pub fn updated(&self) -> SystemTime {
        system_time_from_ns(self.updated_unix_ns)
    }

    /// Hex CRC32 of the object data
    pub fn etag(&self) -> String {
        format!("{:08x}", self.checksum)
    }
}

pub(crate) fn system_time_from_ns(ns: i64) -> SystemTime {
    if ns >= 0 {
        UNIX_EPOCH + Duration::from_nanos(ns as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(ns.unsigned_abs())
    }
}

pub(crate) fn unix_ns(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

// =============================================================================
// KeyIndex
// =============================================================================

/// Sharded index plus the prefix index, kept in step on every mutation
pub struct KeyIndex {
    entries: ShardedIndex,
    prefixes: PrefixIndex,
}

impl KeyIndex {
    pub fn new(partitions: usize, prefix_depth: usize) -> Self {
        Self {
            entries: ShardedIndex::new(partitions),
            prefixes: PrefixIndex::new(prefix_depth),
        }
    }

    pub fn entries(&self) -> &ShardedIndex {
        &self.entries
    }

    pub fn prefixes(&self) -> &PrefixIndex {
        &self.prefixes
    }

    pub fn get(&self, key: &str) -> Option<Arc<IndexEntry>> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: &str, entry: IndexEntry) -> Option<Arc<IndexEntry>> {
        let prev = self.entries.set(key, entry);
        if prev.is_none() {
            self.prefixes.add(key);
        }
        prev
    }

    /// Remove a key. The prefix index drops it first so it never lists a
    /// key the entry map no longer has.
    pub fn remove(&self, key: &str) -> Option<Arc<IndexEntry>> {
        if !self.entries.contains(key) {
            return None;
        }
        self.prefixes.remove(key);
        self.entries.delete(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted keys starting with `prefix`.
    ///
    /// Directory prefixes are answered from the prefix index when possible,
    /// falling back to a range scan of the sorted key cache.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        if !prefix.is_empty() {
            if let Some(keys) = self.prefixes.get(prefix) {
                return keys;
            }
            if let Some(mut keys) = self.prefixes.candidates(prefix) {
                keys.retain(|k| k.starts_with(prefix));
                return keys;
            }
        }
        self.entries.keys_with_prefix(prefix).to_vec()
    }

    pub fn snapshot(&self) -> BTreeMap<String, IndexEntry> {
        self.entries.snapshot()
    }

    /// Rebuild the prefix index from the entry map (after recovery)
    pub fn rebuild_prefixes(&self) {
        let keys = self.entries.sorted_keys();
        self.prefixes.rebuild(keys.iter().map(String::as_str));
    }
}
