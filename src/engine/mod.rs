//! Storage Engine
//!
//! Composes segments, indexes, cache, manifest and multipart uploads into
//! the [`Storage`](crate::storage::Storage) and
//! [`Bucket`](crate::storage::Bucket) contracts.
//!
//! ## Write Path
//! ```text
//! write(key, src)
//!   │
//!   ├─ clean key, load bucket (once)
//!   ├─ lock shard(hash(key))
//!   │    ├─ append record (buffered ≤ inline limit, streamed otherwise)
//!   │    ├─ fsync (unless SyncStrategy::Never)
//!   │    └─ publish index entry
//!   ├─ unlock
//!   ├─ refresh / invalidate small-object cache
//!   └─ maybe write manifest (throttled)
//! ```
//!
//! ## Read Path
//! ```text
//! open(key) → index entry → cache (stamp must match) → pooled segment reader
//! ```

mod bucket;
mod iter;
mod store;

use std::io::{self, Read};

use crate::index::IndexEntry;
use crate::storage::Object;

pub use bucket::LogBucket;
pub use iter::LazyObjectIter;
pub use store::LogStore;

/// Directory holding in-flight multipart uploads of a bucket
pub const MULTIPART_DIR: &str = "multipart";

pub(crate) fn object_from_entry(bucket: &str, key: &str, entry: &IndexEntry) -> Object {
    Object {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size: entry.size,
        content_type: entry.content_type.clone(),
        updated: entry.updated(),
        etag: entry.etag(),
        is_dir: false,
    }
}

/// Read at most `limit` bytes. A shorter source is not an error.
pub(crate) fn read_up_to(src: &mut dyn Read, limit: u64) -> io::Result<Vec<u8>> {
    let mut data = Vec::with_capacity(limit.min(1 << 20) as usize);
    Read::take(src, limit).read_to_end(&mut data)?;
    Ok(data)
}

/// Apply `offset`/`limit` to a sorted key list (`limit == 0` means no limit)
pub(crate) fn apply_offset_limit(mut keys: Vec<String>, offset: usize, limit: usize) -> Vec<String> {
    let start = offset.min(keys.len());
    keys.drain(..start);
    if limit > 0 {
        keys.truncate(limit);
    }
    keys
}
