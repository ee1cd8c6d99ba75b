//! Manifest Module
//!
//! Periodic JSON snapshot of a bucket's index plus the tail position of
//! every shard at snapshot time. On load, recovery starts from the snapshot
//! and only replays what was appended after each tail.
//!
//! ## Format (version 2)
//! ```text
//! {
//!   "version": 2,
//!   "shard_count": 4,
//!   "written_unix_ns": 1700000000000000000,
//!   "last_segments": [ { "shard": 0, "id": 3, "size": 1048576 }, ... ],
//!   "index": { "a/b.txt": { "shard": 0, "segment_id": 3, "offset": 96, ... } }
//! }
//! ```
//! Version 1 manifests (one global `last_segment`, entries without a shard)
//! are upgraded on load.

mod recovery;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SyncStrategy;
use crate::error::{io_context, Result, VaultError};
use crate::index::{unix_ns, IndexEntry};
use crate::segment::SegmentTail;

pub use recovery::{
    recover, RecoveredLayout, RecoveryMode, RecoveryReport, LEGACY_LOG_FILE, SEGMENT_DIR,
};

/// File name of the manifest inside a bucket directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Current manifest schema version
pub const MANIFEST_VERSION: u32 = 2;

/// Index snapshot plus per-shard tails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub shard_count: usize,
    #[serde(default)]
    pub written_unix_ns: i64,
    pub last_segments: Vec<SegmentTail>,
    pub index: BTreeMap<String, IndexEntry>,
}

impl Manifest {
    pub fn new(
        shard_count: usize,
        last_segments: Vec<SegmentTail>,
        index: BTreeMap<String, IndexEntry>,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            shard_count,
            written_unix_ns: unix_ns(SystemTime::now()),
            last_segments,
            index,
        }
    }

    /// Tail recorded for `shard`, if any
    pub fn tail(&self, shard: usize) -> Option<SegmentTail> {
        self.last_segments.iter().copied().find(|t| t.shard == shard)
    }

    /// Parse a manifest of any known version into the current schema
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let probe: VersionProbe = serde_json::from_slice(bytes)?;
        match probe.version {
            MANIFEST_VERSION => Ok(serde_json::from_slice(bytes)?),
            1 => {
                let legacy: LegacyManifest = serde_json::from_slice(bytes)?;
                Ok(legacy.upgrade())
            }
            other => Err(VaultError::Manifest(format!(
                "unsupported manifest version {}",
                other
            ))),
        }
    }

    /// Read the manifest at `path`. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_context(format!("read manifest {}", path.display()))(e)),
        };
        Self::decode(&bytes).map(Some)
    }

    /// Write to a temporary file and rename it over `path`
    pub fn store(&self, path: &Path, sync: SyncStrategy) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(io_context(format!("create {}", tmp.display())))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer
                .flush()
                .map_err(io_context("flush manifest"))?;
            if sync.should_sync() {
                writer
                    .get_ref()
                    .sync_all()
                    .map_err(io_context("sync manifest"))?;
            }
        }

        fs::rename(&tmp, path).map_err(io_context(format!("rename manifest into {}", path.display())))?;

        if sync.should_sync() {
            if let Some(dir) = path.parent() {
                // Persist the rename itself
                if let Ok(dir) = File::open(dir) {
                    let _ = dir.sync_all();
                }
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Version 1: a single shard and one global tail
#[derive(Deserialize)]
struct LegacyManifest {
    last_segment: Option<LegacyTail>,
    #[serde(default)]
    index: BTreeMap<String, LegacyEntry>,
}

#[derive(Deserialize)]
struct LegacyTail {
    id: u64,
    size: u64,
}

#[derive(Deserialize)]
struct LegacyEntry {
    segment_id: u64,
    offset: u64,
    size: u64,
    #[serde(default)]
    content_type: String,
    updated_unix_ns: i64,
    checksum: u32,
}

impl LegacyManifest {
    fn upgrade(self) -> Manifest {
        let last_segments = self
            .last_segment
            .map(|t| SegmentTail {
                shard: 0,
                id: t.id,
                size: t.size,
            })
            .into_iter()
            .collect();
        let index = self
            .index
            .into_iter()
            .map(|(key, e)| {
                let entry = IndexEntry {
                    shard: 0,
                    segment_id: e.segment_id,
                    offset: e.offset,
                    size: e.size,
                    content_type: e.content_type,
                    updated_unix_ns: e.updated_unix_ns,
                    checksum: e.checksum,
                };
                (key, entry)
            })
            .collect();

        Manifest {
            version: MANIFEST_VERSION,
            shard_count: 1,
            written_unix_ns: 0,
            last_segments,
            index,
        }
    }
}

// =============================================================================
// Manifest Writer
// =============================================================================

/// Throttled manifest persistence for one bucket.
///
/// Uses its own lock, separate from the shard write locks. `last` is `None`
/// until the first successful write (or a manifest-based load), so the first
/// opportunistic write after a full replay always goes through.
pub struct ManifestWriter {
    path: PathBuf,
    interval: Duration,
    sync: SyncStrategy,
    last: Mutex<Option<Instant>>,
}

impl ManifestWriter {
    pub fn new(path: impl Into<PathBuf>, interval: Duration, sync: SyncStrategy, loaded: bool) -> Self {
        Self {
            path: path.into(),
            interval,
            sync,
            last: Mutex::new(loaded.then(Instant::now)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot if the interval has passed since the last one.
    ///
    /// Skips without blocking when another thread is already writing.
    /// Failures are logged and otherwise ignored. Returns whether a manifest
    /// was written.
    pub fn maybe_write(&self, build: impl FnOnce() -> Manifest) -> bool {
        if self.interval.is_zero() {
            return false;
        }
        let Some(mut last) = self.last.try_lock() else {
            return false;
        };
        if matches!(*last, Some(at) if at.elapsed() < self.interval) {
            return false;
        }

        let manifest = build();
        match manifest.store(&self.path, self.sync) {
            Ok(()) => {
                *last = Some(Instant::now());
                debug!(path = %self.path.display(), keys = manifest.index.len(), "Manifest written");
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Best-effort manifest write failed");
                false
            }
        }
    }

    /// Write a snapshot now, waiting for any in-flight write
    pub fn write_now(&self, build: impl FnOnce() -> Manifest) -> Result<()> {
        let mut last = self.last.lock();
        let manifest = build();
        manifest.store(&self.path, self.sync)?;
        *last = Some(Instant::now());
        debug!(path = %self.path.display(), keys = manifest.index.len(), "Manifest written");
        Ok(())
    }
}
