//! Tests for object operations on a single bucket
//!
//! These tests verify:
//! - Write/open for buffered, streamed and unknown-size objects
//! - Range reads and their edge cases
//! - Key normalization and traversal rejection
//! - Stat for objects and synthetic directories
//! - Delete semantics, including recursive deletes

use std::io::Read;

use segvault::{CancelToken, ErrorKind, Options, Storage};

use super::{etag, get, put, read_range, setup_store};

// =============================================================================
// Write / Open Tests
// =============================================================================

#[test]
fn test_write_then_open() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");

    let object = put(bucket.as_ref(), "hello.txt", b"hello world");

    assert_eq!(object.bucket, "b");
    assert_eq!(object.key, "hello.txt");
    assert_eq!(object.size, 11);
    assert_eq!(object.etag, etag(b"hello world"));
    assert!(!object.is_dir);
    assert_eq!(get(bucket.as_ref(), "hello.txt"), b"hello world".to_vec());
}

#[test]
fn test_open_reports_metadata() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    let mut src = &b"{}"[..];
    bucket
        .write("doc.json", &mut src, Some(2), "application/json", &Options::default())
        .unwrap();

    let (_, object) = bucket.open("doc.json", 0, 0, &Options::default()).unwrap();
    assert_eq!(object.content_type, "application/json");
    assert_eq!(object.size, 2);
}

#[test]
fn test_empty_object() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    let object = put(bucket.as_ref(), "empty", b"");

    assert_eq!(object.size, 0);
    assert!(get(bucket.as_ref(), "empty").is_empty());
}

#[test]
fn test_large_object_streamed() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    let data: Vec<u8> = (0..700_000u32).map(|i| (i % 253) as u8).collect();

    let object = put(bucket.as_ref(), "big.bin", &data);

    assert_eq!(object.size, data.len() as u64);
    assert_eq!(object.etag, etag(&data));
    assert_eq!(get(bucket.as_ref(), "big.bin"), data);
}

#[test]
fn test_unknown_size_write() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    let data = vec![42u8; 100_000];
    let mut src = data.as_slice();

    let object = bucket
        .write("stream.bin", &mut src, None, "", &Options::default())
        .unwrap();

    assert_eq!(object.size, data.len() as u64);
    assert_eq!(get(bucket.as_ref(), "stream.bin"), data);
}

#[test]
fn test_overwrite_last_writer_wins() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");

    put(bucket.as_ref(), "k", b"first version");
    // Warm the cache with the first body
    assert_eq!(get(bucket.as_ref(), "k"), b"first version".to_vec());
    put(bucket.as_ref(), "k", b"second");

    assert_eq!(get(bucket.as_ref(), "k"), b"second".to_vec());
    assert_eq!(bucket.stat("k", &Options::default()).unwrap().size, 6);
}

// =============================================================================
// Range Read Tests
// =============================================================================

#[test]
fn test_range_reads() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    put(bucket.as_ref(), "digits", b"0123456789");

    assert_eq!(read_range(bucket.as_ref(), "digits", 2, 3), b"234".to_vec());
    assert_eq!(read_range(bucket.as_ref(), "digits", 7, 0), b"789".to_vec());
    assert_eq!(read_range(bucket.as_ref(), "digits", 7, 100), b"789".to_vec());
    assert_eq!(read_range(bucket.as_ref(), "digits", -5, 2), b"01".to_vec());
    assert!(read_range(bucket.as_ref(), "digits", 10, 0).is_empty());
}

#[test]
fn test_range_read_uncached_large() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 7) as u8).collect();
    put(bucket.as_ref(), "big", &data);

    assert_eq!(
        read_range(bucket.as_ref(), "big", 123_456, 1000),
        data[123_456..124_456].to_vec()
    );
}

#[test]
fn test_offset_past_end_is_not_exist() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    put(bucket.as_ref(), "short", b"abc");

    let err = bucket.open("short", 4, 0, &Options::default()).err().unwrap();
    assert!(err.is_not_exist());
}

#[test]
fn test_open_missing() {
    let (_temp, store) = setup_store();
    let err = store.bucket("b").open("nope", 0, 0, &Options::default()).err().unwrap();
    assert!(err.is_not_exist());
}

// =============================================================================
// Key Normalization Tests
// =============================================================================

#[test]
fn test_keys_are_normalized() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");

    let object = put(bucket.as_ref(), " \\a\\.\\b.txt ", b"x");

    assert_eq!(object.key, "a/b.txt");
    assert_eq!(get(bucket.as_ref(), "/a/b.txt"), b"x".to_vec());
    assert_eq!(get(bucket.as_ref(), "a//c/../b.txt"), b"x".to_vec());
}

#[test]
fn test_traversal_rejected() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");

    for key in ["../etc/passwd", "a/../../b", ".."] {
        let mut src = &b"x"[..];
        let err = bucket
            .write(key, &mut src, Some(1), "", &Options::default())
            .unwrap_err();
        assert!(err.is_permission(), "{:?} gave {:?}", key, err);
    }
    assert!(bucket.list("", 0, 0, &Options::default()).unwrap().next().is_none());
}

#[test]
fn test_empty_keys_rejected() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");

    for key in ["", "   ", "/", ".", "./"] {
        let err = bucket.stat(key, &Options::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{:?}", key);
    }
}

// =============================================================================
// Stat Tests
// =============================================================================

#[test]
fn test_stat_directory() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    put(bucket.as_ref(), "docs/a.txt", b"a");
    put(bucket.as_ref(), "docs/sub/b.txt", b"bb");

    let dir = bucket.stat("docs/", &Options::default()).unwrap();
    assert!(dir.is_dir);
    assert_eq!(dir.key, "docs/");
    assert_eq!(dir.size, 0);

    // Without the trailing slash only exact keys match
    assert!(bucket.stat("docs", &Options::default()).unwrap_err().is_not_exist());
    assert!(bucket.stat("nothing/", &Options::default()).unwrap_err().is_not_exist());
}

#[test]
fn test_stat_object() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    let written = put(bucket.as_ref(), "k", b"data");

    let stat = bucket.stat("k", &Options::default()).unwrap();
    assert_eq!(stat, written);
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    put(bucket.as_ref(), "k", b"v");

    bucket.delete("k", &Options::default()).unwrap();

    assert!(bucket.stat("k", &Options::default()).unwrap_err().is_not_exist());
    assert!(bucket.delete("k", &Options::default()).unwrap_err().is_not_exist());
}

#[test]
fn test_recursive_delete() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    for key in ["dir/a", "dir/sub/b", "dir2/c", "dir"] {
        put(bucket.as_ref(), key, b"x");
    }

    // Without recursive only the exact key goes
    bucket.delete("dir", &Options::default()).unwrap();
    assert!(bucket.stat("dir/a", &Options::default()).is_ok());

    bucket.delete("dir", &Options::recursive(true)).unwrap();
    assert!(bucket.stat("dir/a", &Options::default()).is_err());
    assert!(bucket.stat("dir/sub/b", &Options::default()).is_err());
    assert!(bucket.stat("dir2/c", &Options::default()).is_ok());
}

// =============================================================================
// Options / Capability Tests
// =============================================================================

#[test]
fn test_cancelled_operation() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    let token = CancelToken::new();
    token.cancel();
    let opts = Options::default().with_cancel(token);

    let mut src = &b"x"[..];
    let err = bucket.write("k", &mut src, Some(1), "", &opts).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(bucket.stat("k", &Options::default()).is_err());
}

#[test]
fn test_signed_url_unsupported() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    let err = bucket
        .signed_url("k", "GET", std::time::Duration::from_secs(60), &Options::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert!(!bucket.features().signed_url);
    assert!(bucket.features().multipart);
}

#[test]
fn test_missing_bucket() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("absent");
    assert!(bucket.stat("k", &Options::default()).unwrap_err().is_not_exist());
    assert!(bucket.info(&Options::default()).unwrap_err().is_not_exist());
}

#[test]
fn test_reader_outlives_overwrite() {
    let (_temp, store) = setup_store();
    let bucket = store.bucket("b");
    let data = vec![1u8; 400_000];
    put(bucket.as_ref(), "k", &data);

    let (mut reader, _) = bucket.open("k", 0, 0, &Options::default()).unwrap();
    put(bucket.as_ref(), "k", b"replaced");

    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}
