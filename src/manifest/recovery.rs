//! Bucket Recovery
//!
//! Rebuilds the index of a bucket from its manifest and segment log.
//!
//! 1. Migrate a pre-segment `data.log` into shard 0, segment 1
//! 2. Discover segments; the shard count on disk wins over configuration
//! 3. Load the manifest if it is readable and consistent with the segments
//! 4. Replay every segment after the manifest tails (all of them without one)
//! 5. Report each shard's last segment and its valid length
//!
//! Incomplete trailing bytes are only tolerated in the last segment of a
//! shard. Anything else that fails to decode aborts the load.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::{Manifest, MANIFEST_FILE};
use crate::error::{io_context, Result, VaultError};
use crate::index::{IndexEntry, ShardedIndex};
use crate::record::{scan_segment, RecordOp, ScannedRecord};
use crate::segment::{discover_segments, segment_file_name, segment_path, SegmentTail};

/// Directory holding the segment files of a bucket
pub const SEGMENT_DIR: &str = "segments";

/// Single log file used before segments existed
pub const LEGACY_LOG_FILE: &str = "data.log";

/// How the index was rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// No segments on disk yet
    Fresh,
    /// Manifest snapshot plus tail replay
    Manifest,
    /// Every segment replayed from offset 0
    FullReplay,
}

/// Summary of a bucket load
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub mode: RecoveryMode,
    pub shard_count: usize,
    pub segments_scanned: usize,
    pub records_applied: u64,
    pub torn_tails: usize,
    pub migrated_legacy_log: bool,
    pub elapsed: Duration,
}

/// What the segment manager needs to resume appending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredLayout {
    pub shard_count: usize,
    /// Last segment of each shard and its valid length; `None` for a shard
    /// without segments
    pub tails: Vec<Option<SegmentTail>>,
}

/// Rebuild `index` for the bucket stored in `bucket_dir`
pub fn recover(
    bucket_dir: &Path,
    configured_shards: usize,
    index: &ShardedIndex,
) -> Result<(RecoveredLayout, RecoveryReport)> {
    let started = Instant::now();
    let seg_dir = bucket_dir.join(SEGMENT_DIR);
    fs::create_dir_all(&seg_dir).map_err(io_context(format!("create {}", seg_dir.display())))?;

    // Step 1: legacy single-file log
    let migrated_legacy_log = migrate_legacy_log(bucket_dir, &seg_dir)?;

    // Step 2: segments on disk decide the shard count
    let on_disk = discover_segments(&seg_dir)?;
    let shard_count = match on_disk.keys().next_back() {
        Some(&max_shard) => {
            let found = max_shard + 1;
            if found != configured_shards {
                warn!(
                    bucket = %bucket_dir.display(),
                    configured = configured_shards,
                    found,
                    "Shard count taken from existing segments"
                );
            }
            found
        }
        None => configured_shards.max(1),
    };

    // Step 3: manifest
    let manifest_path = bucket_dir.join(MANIFEST_FILE);
    let manifest = match Manifest::load(&manifest_path) {
        Ok(Some(manifest)) => match check_manifest(&manifest, shard_count, &seg_dir, &on_disk) {
            Ok(()) => Some(manifest),
            Err(reason) => {
                warn!(path = %manifest_path.display(), %reason, "Manifest is stale, falling back to full replay");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(path = %manifest_path.display(), error = %e, "Manifest unreadable, falling back to full replay");
            None
        }
    };

    let mut resume_from: Vec<Option<SegmentTail>> = vec![None; shard_count];
    let mode = match manifest {
        Some(manifest) => {
            for tail in &manifest.last_segments {
                resume_from[tail.shard] = Some(*tail);
            }
            for (key, entry) in manifest.index {
                index.set(&key, entry);
            }
            RecoveryMode::Manifest
        }
        None if on_disk.is_empty() => RecoveryMode::Fresh,
        None => RecoveryMode::FullReplay,
    };

    // Step 4: replay
    let mut tails: Vec<Option<SegmentTail>> = vec![None; shard_count];
    let mut segments_scanned = 0usize;
    let mut records_applied = 0u64;
    let mut torn_tails = 0usize;

    for (&shard, ids) in &on_disk {
        let Some(&last_id) = ids.last() else {
            continue;
        };
        for &id in ids {
            let start = match resume_from[shard] {
                Some(tail) if id < tail.id => continue,
                Some(tail) if id == tail.id => tail.size,
                _ => 0,
            };

            let name = segment_file_name(shard, id);
            let path = segment_path(&seg_dir, shard, id);
            let file = File::open(&path).map_err(io_context(format!("open segment {}", path.display())))?;
            let len = file
                .metadata()
                .map_err(io_context(format!("stat segment {}", path.display())))?
                .len();

            let outcome = scan_segment(&file, len, start, &name, |record| {
                apply_record(index, shard, id, record)
            })?;
            segments_scanned += 1;
            records_applied += outcome.records;

            if let Some(stop) = outcome.stop {
                if id != last_id {
                    return Err(VaultError::corrupt(
                        name,
                        stop.offset(),
                        "incomplete record in a sealed segment",
                    ));
                }
                torn_tails += 1;
                warn!(segment = %name, offset = stop.offset(), ?stop, "Torn tail found, ignoring trailing bytes");
            }

            if id == last_id {
                tails[shard] = Some(SegmentTail {
                    shard,
                    id,
                    size: outcome.end,
                });
            }
        }
    }

    let report = RecoveryReport {
        mode,
        shard_count,
        segments_scanned,
        records_applied,
        torn_tails,
        migrated_legacy_log,
        elapsed: started.elapsed(),
    };
    info!(
        bucket = %bucket_dir.display(),
        mode = ?report.mode,
        shards = shard_count,
        segments = segments_scanned,
        records = records_applied,
        keys = index.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Bucket recovered"
    );

    Ok((RecoveredLayout { shard_count, tails }, report))
}

fn apply_record(index: &ShardedIndex, shard: usize, segment_id: u64, record: ScannedRecord) {
    match record.header.op {
        RecordOp::Put => {
            index.set(
                &record.key,
                IndexEntry {
                    shard,
                    segment_id,
                    offset: record.data_offset,
                    size: record.header.data_len,
                    content_type: record.content_type,
                    updated_unix_ns: record.header.updated_ns,
                    checksum: record.header.checksum,
                },
            );
        }
        RecordOp::Delete => {
            index.delete(&record.key);
        }
    }
}

/// Why a manifest cannot be trusted, if it cannot
fn check_manifest(
    manifest: &Manifest,
    shard_count: usize,
    seg_dir: &Path,
    on_disk: &BTreeMap<usize, Vec<u64>>,
) -> std::result::Result<(), String> {
    if manifest.shard_count != shard_count {
        return Err(format!(
            "manifest has {} shards, segments have {}",
            manifest.shard_count, shard_count
        ));
    }

    let mut seen = vec![false; shard_count];
    for tail in &manifest.last_segments {
        if tail.shard >= shard_count || seen[tail.shard] {
            return Err(format!("bad tail entry for shard {}", tail.shard));
        }
        seen[tail.shard] = true;

        let exists = on_disk
            .get(&tail.shard)
            .map_or(false, |ids| ids.binary_search(&tail.id).is_ok());
        if !exists {
            return Err(format!("segment {} is missing", segment_file_name(tail.shard, tail.id)));
        }
        let len = fs::metadata(segment_path(seg_dir, tail.shard, tail.id))
            .map(|m| m.len())
            .map_err(|e| e.to_string())?;
        if tail.size > len {
            return Err(format!(
                "tail {} of {} is beyond its length {}",
                tail.size,
                segment_file_name(tail.shard, tail.id),
                len
            ));
        }
    }

    if let Some((key, _)) = manifest.index.iter().find(|(_, e)| e.shard >= shard_count) {
        return Err(format!("entry {:?} points at unknown shard", key));
    }

    // The index is snapshotted after the tails, so a write racing the
    // snapshot can be listed without being covered by its shard's tail.
    let mut tails: Vec<Option<SegmentTail>> = vec![None; shard_count];
    for tail in &manifest.last_segments {
        tails[tail.shard] = Some(*tail);
    }
    if let Some((key, _)) = manifest
        .index
        .iter()
        .find(|(_, e)| !tails[e.shard].map_or(false, |tail| tail_covers(&tail, e)))
    {
        return Err(format!("entry {:?} lies past its shard tail", key));
    }
    Ok(())
}

fn tail_covers(tail: &SegmentTail, entry: &IndexEntry) -> bool {
    match entry.segment_id.cmp(&tail.id) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Equal => entry.offset.saturating_add(entry.size) <= tail.size,
        std::cmp::Ordering::Greater => false,
    }
}

/// Move `data.log` into place as the first segment of shard 0
fn migrate_legacy_log(bucket_dir: &Path, seg_dir: &Path) -> Result<bool> {
    let legacy = bucket_dir.join(LEGACY_LOG_FILE);
    match fs::metadata(&legacy) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(io_context(format!("stat {}", legacy.display()))(e)),
    }

    let first = segment_path(seg_dir, 0, 1);
    if first.exists() {
        return Ok(false);
    }
    fs::rename(&legacy, &first).map_err(io_context("migrate legacy log"))?;
    info!(from = %legacy.display(), to = %first.display(), "Migrated legacy log");
    Ok(true)
}
