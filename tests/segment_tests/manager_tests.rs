//! Tests for SegmentManager
//!
//! These tests verify:
//! - Segment naming and discovery
//! - Shard routing is stable and in range
//! - Resuming a shard cuts off a torn tail
//! - Tails reflect every append

use std::fs::{self, OpenOptions};
use std::io::Write;

use segvault::config::SyncStrategy;
use segvault::record::RecordOp;
use segvault::segment::{
    discover_segments, parse_segment_file_name, segment_file_name, segment_path, shard_for_key,
    SegmentManager, SegmentTail,
};
use tempfile::TempDir;

// =============================================================================
// Naming Tests
// =============================================================================

#[test]
fn test_segment_file_name() {
    assert_eq!(segment_file_name(0, 1), "seg-0000-000000000001.log");
    assert_eq!(segment_file_name(12, 345), "seg-0012-000000000345.log");
}

#[test]
fn test_parse_segment_file_name() {
    assert_eq!(parse_segment_file_name("seg-0003-000000000042.log"), Some((3, 42)));
    assert_eq!(parse_segment_file_name("seg-0003-000000000042.tmp"), None);
    assert_eq!(parse_segment_file_name("seg--000000000042.log"), None);
    assert_eq!(parse_segment_file_name("seg-00a3-000000000042.log"), None);
    assert_eq!(parse_segment_file_name("manifest.json"), None);
}

#[test]
fn test_discover_segments() {
    let temp = TempDir::new().unwrap();
    for (shard, id) in [(1, 2), (0, 1), (1, 1), (0, 10)] {
        fs::write(segment_path(temp.path(), shard, id), b"").unwrap();
    }
    fs::write(temp.path().join("notes.txt"), b"ignored").unwrap();

    let found = discover_segments(temp.path()).unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found[&0], vec![1, 10]);
    assert_eq!(found[&1], vec![1, 2]);
}

#[test]
fn test_discover_missing_dir() {
    let temp = TempDir::new().unwrap();
    let found = discover_segments(&temp.path().join("absent")).unwrap();
    assert!(found.is_empty());
}

#[test]
fn test_shard_for_key_stable() {
    for key in ["a", "photos/cat.jpg", "deep/er/key"] {
        let shard = shard_for_key(key, 8);
        assert!(shard < 8);
        assert_eq!(shard, shard_for_key(key, 8));
    }
    assert_eq!(shard_for_key("anything", 1), 0);
}

// =============================================================================
// Open / Resume Tests
// =============================================================================

#[test]
fn test_open_creates_first_segment_per_shard() {
    let temp = TempDir::new().unwrap();
    let manager = SegmentManager::open(temp.path(), &[None, None, None], SyncStrategy::Never, 0).unwrap();

    assert_eq!(manager.shard_count(), 3);
    for shard in 0..3 {
        assert!(segment_path(temp.path(), shard, 1).exists());
        assert_eq!(manager.list_segments(shard).unwrap(), vec![1]);
    }
    assert_eq!(
        manager.tails(),
        vec![
            SegmentTail { shard: 0, id: 1, size: 0 },
            SegmentTail { shard: 1, id: 1, size: 0 },
            SegmentTail { shard: 2, id: 1, size: 0 },
        ]
    );
}

#[test]
fn test_open_without_shards_fails() {
    let temp = TempDir::new().unwrap();
    assert!(SegmentManager::open(temp.path(), &[], SyncStrategy::Never, 0).is_err());
}

#[test]
fn test_resume_truncates_torn_tail() {
    let temp = TempDir::new().unwrap();
    let size = {
        let manager = SegmentManager::open(temp.path(), &[None], SyncStrategy::Never, 0).unwrap();
        let mut guard = manager.lock(0);
        guard.append(RecordOp::Put, "k", "", b"value", 0, 1).unwrap();
        guard.tail().size
    };

    let path = segment_path(temp.path(), 0, 1);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xEE; 17]).unwrap();
    drop(file);

    let tail = SegmentTail { shard: 0, id: 1, size };
    let manager = SegmentManager::open(temp.path(), &[Some(tail)], SyncStrategy::Never, 0).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), size);
    assert_eq!(manager.tails(), vec![tail]);

    // New appends land right after the last good record
    let location = manager
        .lock(0)
        .append(RecordOp::Put, "k2", "", b"x", 0, 2)
        .unwrap();
    assert_eq!(location.offset, size);
}

// =============================================================================
// Append / Read Tests
// =============================================================================

#[test]
fn test_append_then_read_range() {
    let temp = TempDir::new().unwrap();
    let manager = SegmentManager::open(temp.path(), &[None], SyncStrategy::EveryWrite, 0).unwrap();

    let location = manager
        .lock(0)
        .append(RecordOp::Put, "greeting", "text/plain", b"hello world", 0, 7)
        .unwrap();

    let mut reader = manager
        .read_range(0, location.segment_id, location.data_offset + 6, 5)
        .unwrap();
    let mut out = String::new();
    std::io::Read::read_to_string(&mut reader, &mut out).unwrap();
    assert_eq!(out, "world");
}

#[test]
fn test_tails_track_appends() {
    let temp = TempDir::new().unwrap();
    let manager = SegmentManager::open(temp.path(), &[None, None], SyncStrategy::Never, 0).unwrap();

    let location = manager.lock(1).append(RecordOp::Put, "k", "", b"abc", 0, 0).unwrap();

    let tails = manager.tails();
    assert_eq!(tails[0].size, 0);
    assert_eq!(tails[1].size, location.data_offset + 3);
}

#[test]
fn test_close_rejects_new_readers() {
    let temp = TempDir::new().unwrap();
    let manager = SegmentManager::open(temp.path(), &[None], SyncStrategy::Never, 0).unwrap();
    manager.close().unwrap();

    assert!(matches!(
        manager.open_reader(0, 1),
        Err(segvault::VaultError::Closed)
    ));
}
