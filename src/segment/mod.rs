//! Segment Module
//!
//! Append-only segment files, one chain per (bucket, shard).
//!
//! ## Responsibilities
//! - Route a key to its shard (stable hash)
//! - Serialize appends per shard, rotate by size
//! - Pool read handles for concurrent range reads
//!
//! ## Layout
//! ```text
//! {bucket}/segments/
//!   ├── seg-0000-000000000001.log   shard 0, immutable
//!   ├── seg-0000-000000000002.log   shard 0, active
//!   ├── seg-0001-000000000001.log   shard 1, active
//!   └── ...
//! ```
//! Ids start at 1 and are zero padded so lexical order is numeric order.

mod pool;
mod writer;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::SyncStrategy;
use crate::error::{io_context, Result, VaultError};
use crate::key::key_hash;

pub use pool::{PooledFile, ReaderPool, SegmentRangeReader};
pub use writer::{PendingRecord, RecordLocation, ShardGuard, INLINE_RECORD_MAX};

use writer::SegmentWriter;

/// Position of a shard's active segment at some point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentTail {
    pub shard: usize,
    pub id: u64,
    pub size: u64,
}

// =============================================================================
// Naming and Discovery
// =============================================================================

pub fn segment_file_name(shard: usize, id: u64) -> String {
    format!("seg-{:04}-{:012}.log", shard, id)
}

pub fn segment_path(dir: &Path, shard: usize, id: u64) -> PathBuf {
    dir.join(segment_file_name(shard, id))
}

/// Parse `seg-{shard}-{id}.log`
pub fn parse_segment_file_name(name: &str) -> Option<(usize, u64)> {
    let rest = name.strip_prefix("seg-")?.strip_suffix(".log")?;
    let (shard, id) = rest.split_once('-')?;
    if shard.is_empty() || id.is_empty() {
        return None;
    }
    if !shard.bytes().chain(id.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((shard.parse().ok()?, id.parse().ok()?))
}

/// Segment ids per shard, ascending. A missing directory is an empty map.
pub fn discover_segments(dir: &Path) -> Result<BTreeMap<usize, Vec<u64>>> {
    let mut found: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(io_context(format!("list segments in {}", dir.display()))(e)),
    };

    for entry in entries {
        let entry = entry.map_err(io_context("read segment directory entry"))?;
        let name = entry.file_name();
        if let Some((shard, id)) = name.to_str().and_then(parse_segment_file_name) {
            found.entry(shard).or_default().push(id);
        }
    }
    for ids in found.values_mut() {
        ids.sort_unstable();
    }
    Ok(found)
}

/// Shard owning `key` for a bucket with `shard_count` shards
pub fn shard_for_key(key: &str, shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    (key_hash(key) % shard_count as u64) as usize
}

// =============================================================================
// Segment Manager
// =============================================================================

/// Every shard's active segment plus the shared reader pool
pub struct SegmentManager {
    dir: PathBuf,
    writers: Vec<Mutex<SegmentWriter>>,
    readers: ReaderPool,
    sync: SyncStrategy,
    max_segment_size: u64,
}

impl SegmentManager {
    /// Open the writers of a bucket.
    ///
    /// `tails[shard]` is the last segment of the shard and its valid length
    /// as established by recovery; `None` starts the shard at segment 1.
    pub fn open(
        dir: impl Into<PathBuf>,
        tails: &[Option<SegmentTail>],
        sync: SyncStrategy,
        max_segment_size: u64,
    ) -> Result<Self> {
        let dir = dir.into();
        if tails.is_empty() {
            return Err(VaultError::Config("a bucket needs at least one shard".to_string()));
        }
        fs::create_dir_all(&dir).map_err(io_context(format!("create {}", dir.display())))?;

        let mut writers = Vec::with_capacity(tails.len());
        for (shard, tail) in tails.iter().enumerate() {
            let writer = match tail {
                Some(tail) => SegmentWriter::resume(&dir, shard, tail.id, tail.size)?,
                None => SegmentWriter::create(&dir, shard, 1)?,
            };
            writers.push(Mutex::new(writer));
        }

        Ok(Self {
            readers: ReaderPool::new(dir.clone()),
            dir,
            writers,
            sync,
            max_segment_size,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.writers.len()
    }

    pub fn shard_for(&self, key: &str) -> usize {
        shard_for_key(key, self.writers.len())
    }

    /// Lock a shard for appending
    pub fn lock(&self, shard: usize) -> ShardGuard<'_> {
        ShardGuard {
            writer: self.writers[shard].lock(),
            dir: &self.dir,
            sync: self.sync,
            max_segment_size: self.max_segment_size,
        }
    }

    /// Force a rotation of a shard's active segment
    pub fn rotate(&self, shard: usize) -> Result<()> {
        self.lock(shard).rotate()
    }

    /// Check out a pooled read handle
    pub fn open_reader(&self, shard: usize, segment_id: u64) -> Result<PooledFile> {
        self.readers.get(shard, segment_id)
    }

    /// Reader over `len` bytes starting at `offset`
    pub fn read_range(
        &self,
        shard: usize,
        segment_id: u64,
        offset: u64,
        len: u64,
    ) -> Result<SegmentRangeReader> {
        let file = self.open_reader(shard, segment_id)?;
        Ok(SegmentRangeReader::new(file, offset, len))
    }

    /// Sorted segment ids of one shard
    pub fn list_segments(&self, shard: usize) -> Result<Vec<u64>> {
        Ok(discover_segments(&self.dir)?
            .remove(&shard)
            .unwrap_or_default())
    }

    /// Tail of every shard, each captured under that shard's lock
    pub fn tails(&self) -> Vec<SegmentTail> {
        (0..self.writers.len())
            .map(|shard| self.lock(shard).tail())
            .collect()
    }

    pub fn readers(&self) -> &ReaderPool {
        &self.readers
    }

    /// Flush every active segment
    pub fn sync_all(&self) -> Result<()> {
        for shard in 0..self.writers.len() {
            let guard = self.lock(shard);
            guard
                .writer
                .file_sync()
                .map_err(io_context(format!("sync shard {}", shard)))?;
        }
        Ok(())
    }

    /// Sync the active segments and close every pooled reader
    pub fn close(&self) -> Result<()> {
        let synced = self.sync_all();
        self.readers.close_all();
        synced
    }
}
