//! Tests for reopening buckets
//!
//! These tests verify:
//! - Data written before a close or a crash is readable after reopening
//! - A clean close leaves nothing to replay
//! - Manifest recovery and full replay build the same index
//! - Torn tails are dropped and the bucket stays writable

use std::fs::{self, OpenOptions};
use std::io::Write;

use segvault::manifest::{RecoveryMode, MANIFEST_FILE};
use segvault::{Bucket, MultipartBucket, Options, Storage};
use tempfile::TempDir;

use super::{get, list_keys, open_store, put};

fn seed(temp: &TempDir, shards: usize) {
    let store = open_store(temp.path(), shards);
    store.create_bucket("b", &Options::default()).unwrap();
    let bucket = store.bucket("b");
    for i in 0..20 {
        put(bucket.as_ref(), &format!("dir/{:02}", i), format!("value {}", i).as_bytes());
    }
    put(bucket.as_ref(), "dir/05", b"overwritten");
    bucket.delete("dir/07", &Options::default()).unwrap();
    store.close().unwrap();
}

#[test]
fn test_reopen_after_clean_close() {
    let temp = TempDir::new().unwrap();
    seed(&temp, 4);

    let store = open_store(temp.path(), 4);
    let bucket = store.log_bucket("b");

    assert_eq!(get(bucket.as_ref(), "dir/05"), b"overwritten".to_vec());
    assert_eq!(get(bucket.as_ref(), "dir/19"), b"value 19".to_vec());
    assert!(bucket.stat("dir/07", &Options::default()).unwrap_err().is_not_exist());
    assert_eq!(list_keys(bucket.as_ref(), "dir/", &Options::default()).len(), 19);

    let report = bucket.recovery_report().unwrap();
    assert_eq!(report.mode, RecoveryMode::Manifest);
    assert_eq!(report.records_applied, 0);
    assert_eq!(report.torn_tails, 0);
}

#[test]
fn test_reopen_without_close() {
    let temp = TempDir::new().unwrap();
    {
        let store = open_store(temp.path(), 2);
        store.create_bucket("b", &Options::default()).unwrap();
        let bucket = store.bucket("b");
        put(bucket.as_ref(), "a", b"1");
        put(bucket.as_ref(), "b", b"2");
        put(bucket.as_ref(), "a", b"3");
        // Skip close entirely, as a crash would
        std::mem::forget(bucket);
        std::mem::forget(store);
    }

    let store = open_store(temp.path(), 2);
    let bucket = store.bucket("b");
    assert_eq!(get(bucket.as_ref(), "a"), b"3".to_vec());
    assert_eq!(get(bucket.as_ref(), "b"), b"2".to_vec());
}

#[test]
fn test_full_replay_matches_manifest() {
    let temp = TempDir::new().unwrap();
    seed(&temp, 4);

    let with_manifest = {
        let store = open_store(temp.path(), 4);
        let snapshot = store.log_bucket("b").index_snapshot().unwrap();
        store.close().unwrap();
        snapshot
    };

    fs::remove_file(temp.path().join("b").join(MANIFEST_FILE)).unwrap();
    let store = open_store(temp.path(), 4);
    let bucket = store.log_bucket("b");

    assert_eq!(bucket.recovery_report().unwrap().mode, RecoveryMode::FullReplay);
    assert_eq!(bucket.index_snapshot().unwrap(), with_manifest);
}

#[test]
fn test_corrupt_manifest_falls_back_to_replay() {
    let temp = TempDir::new().unwrap();
    seed(&temp, 4);
    fs::write(temp.path().join("b").join(MANIFEST_FILE), b"{ not json").unwrap();

    let store = open_store(temp.path(), 4);
    let bucket = store.log_bucket("b");

    assert_eq!(bucket.recovery_report().unwrap().mode, RecoveryMode::FullReplay);
    assert_eq!(get(bucket.as_ref(), "dir/05"), b"overwritten".to_vec());
}

#[test]
fn test_reopen_is_idempotent() {
    let temp = TempDir::new().unwrap();
    seed(&temp, 3);

    let first = {
        let store = open_store(temp.path(), 3);
        store.log_bucket("b").index_snapshot().unwrap()
    };
    let second = {
        let store = open_store(temp.path(), 3);
        store.log_bucket("b").index_snapshot().unwrap()
    };
    assert_eq!(first, second);
}

#[test]
fn test_shard_count_follows_existing_segments() {
    let temp = TempDir::new().unwrap();
    seed(&temp, 4);

    let store = open_store(temp.path(), 8);
    let bucket = store.log_bucket("b");

    assert_eq!(bucket.shard_count().unwrap(), 4);
    assert_eq!(get(bucket.as_ref(), "dir/00"), b"value 0".to_vec());
}

#[test]
fn test_torn_tail_is_dropped() {
    let temp = TempDir::new().unwrap();
    seed(&temp, 1);

    let segment = temp
        .path()
        .join("b")
        .join("segments")
        .join("seg-0000-000000000001.log");
    let clean_len = fs::metadata(&segment).unwrap().len();
    let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
    file.write_all(b"\x52\x56\x47\x53\x01\x00\x07").unwrap();
    drop(file);

    {
        let store = open_store(temp.path(), 1);
        let bucket = store.log_bucket("b");
        assert_eq!(bucket.recovery_report().unwrap().torn_tails, 1);
        assert_eq!(get(bucket.as_ref(), "dir/10"), b"value 10".to_vec());
        assert_eq!(fs::metadata(&segment).unwrap().len(), clean_len);

        put(bucket.as_ref(), "after", b"still writable");
        store.close().unwrap();
    }

    let store = open_store(temp.path(), 1);
    let bucket = store.log_bucket("b");
    assert_eq!(bucket.recovery_report().unwrap().torn_tails, 0);
    assert_eq!(get(bucket.as_ref(), "after"), b"still writable".to_vec());
    assert_eq!(get(bucket.as_ref(), "dir/10"), b"value 10".to_vec());
}

#[test]
fn test_unknown_size_object_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
    {
        let store = open_store(temp.path(), 2);
        store.create_bucket("b", &Options::default()).unwrap();
        let mut src = data.as_slice();
        store
            .bucket("b")
            .write("stream", &mut src, None, "", &Options::default())
            .unwrap();
        store.close().unwrap();
    }

    fs::remove_file(temp.path().join("b").join(MANIFEST_FILE)).unwrap();
    let store = open_store(temp.path(), 2);
    let bucket = store.bucket("b");
    assert_eq!(bucket.stat("stream", &Options::default()).unwrap().size, data.len() as u64);
    assert_eq!(get(bucket.as_ref(), "stream"), data);
}

#[test]
fn test_pending_multipart_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let upload = {
        let store = open_store(temp.path(), 2);
        store.create_bucket("b", &Options::default()).unwrap();
        let bucket = store.bucket("b");
        let mp = bucket.as_multipart().unwrap();
        let upload = mp.init_multipart("k", "", &Options::default()).unwrap();
        let mut src = &b"part one"[..];
        mp.upload_part(&upload, 1, &mut src, Some(8), &Options::default())
            .unwrap();
        store.close().unwrap();
        upload
    };

    let store = open_store(temp.path(), 2);
    let bucket = store.log_bucket("b");
    assert_eq!(bucket.uploads().unwrap().len(), 1);
    bucket
        .complete_multipart(&upload, &[segvault::PartInfo::numbered(1)], &Options::default())
        .unwrap();
    assert_eq!(get(bucket.as_ref(), "k"), b"part one".to_vec());
}

#[test]
fn test_flushed_manifest_covers_crash() {
    let temp = TempDir::new().unwrap();
    {
        let store = open_store(temp.path(), 2);
        store.create_bucket("b", &Options::default()).unwrap();
        let bucket = store.log_bucket("b");
        put(bucket.as_ref(), "x", b"1");
        put(bucket.as_ref(), "y", b"2");
        bucket.flush_manifest().unwrap();
        put(bucket.as_ref(), "z", b"3");
        std::mem::forget(bucket);
        std::mem::forget(store);
    }

    let store = open_store(temp.path(), 2);
    let bucket = store.log_bucket("b");
    let report = bucket.recovery_report().unwrap();

    assert_eq!(report.mode, RecoveryMode::Manifest);
    assert_eq!(report.records_applied, 1);
    assert_eq!(get(bucket.as_ref(), "z"), b"3".to_vec());
    assert_eq!(bucket.index_snapshot().unwrap().len(), 3);
}
