//! Tests for scan_segment
//!
//! These tests verify:
//! - Complete records are visited in order with correct data offsets
//! - Trailing partial records are reported, not treated as errors
//! - Undecodable headers are fatal and carry their location

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use segvault::record::{scan_segment, RecordHeader, RecordOp, ScanStop, HEADER_SIZE};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_segment() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("seg-0000-000000000001.log");
    (temp_dir, path)
}

fn encode_record(op: RecordOp, key: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let header = RecordHeader::new(op, key, content_type, data.len() as u64, 42, crc32fast::hash(data)).unwrap();
    let mut out = header.encode().to_vec();
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(content_type.as_bytes());
    out.extend_from_slice(data);
    out
}

fn append_bytes(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

fn scan_all(path: &Path, start: u64) -> (Vec<(u64, String, u64)>, segvault::Result<segvault::record::ScanOutcome>) {
    let file = File::open(path).unwrap();
    let len = file.metadata().unwrap().len();
    let mut seen = Vec::new();
    let outcome = scan_segment(&file, len, start, "seg-0000-000000000001.log", |r| {
        seen.push((r.offset, r.key, r.data_offset))
    });
    (seen, outcome)
}

// =============================================================================
// Clean Segment Tests
// =============================================================================

#[test]
fn test_scan_empty_segment() {
    let (_temp, path) = setup_temp_segment();
    File::create(&path).unwrap();

    let (seen, outcome) = scan_all(&path, 0);
    let outcome = outcome.unwrap();

    assert!(seen.is_empty());
    assert_eq!(outcome.records, 0);
    assert_eq!(outcome.end, 0);
    assert_eq!(outcome.stop, None);
}

#[test]
fn test_scan_visits_records_in_order() {
    let (_temp, path) = setup_temp_segment();
    let first = encode_record(RecordOp::Put, "a.txt", "text/plain", b"hello");
    let second = encode_record(RecordOp::Delete, "a.txt", "", b"");
    let third = encode_record(RecordOp::Put, "b/c.bin", "", &[7u8; 100]);
    append_bytes(&path, &first);
    append_bytes(&path, &second);
    append_bytes(&path, &third);

    let (seen, outcome) = scan_all(&path, 0);
    let outcome = outcome.unwrap();

    assert_eq!(outcome.records, 3);
    assert_eq!(outcome.end, (first.len() + second.len() + third.len()) as u64);
    assert_eq!(outcome.stop, None);

    let keys: Vec<&str> = seen.iter().map(|(_, k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["a.txt", "a.txt", "b/c.bin"]);

    // data starts after header, key and content type
    assert_eq!(seen[0].0, 0);
    assert_eq!(seen[0].2, (HEADER_SIZE + 5 + 10) as u64);
    assert_eq!(seen[1].0, first.len() as u64);
    assert_eq!(seen[2].0, (first.len() + second.len()) as u64);
}

#[test]
fn test_scan_from_offset() {
    let (_temp, path) = setup_temp_segment();
    let first = encode_record(RecordOp::Put, "one", "", b"1");
    append_bytes(&path, &first);
    append_bytes(&path, &encode_record(RecordOp::Put, "two", "", b"2"));

    let (seen, outcome) = scan_all(&path, first.len() as u64);

    assert_eq!(outcome.unwrap().records, 1);
    assert_eq!(seen[0].1, "two");
}

// =============================================================================
// Torn Tail Tests
// =============================================================================

#[test]
fn test_scan_short_header_tail() {
    let (_temp, path) = setup_temp_segment();
    let record = encode_record(RecordOp::Put, "k", "", b"value");
    append_bytes(&path, &record);
    append_bytes(&path, &[0xAB; 10]);

    let (_, outcome) = scan_all(&path, 0);
    let outcome = outcome.unwrap();

    assert_eq!(outcome.records, 1);
    assert_eq!(outcome.end, record.len() as u64);
    assert_eq!(
        outcome.stop,
        Some(ScanStop::ShortHeader {
            offset: record.len() as u64,
            available: 10
        })
    );
}

#[test]
fn test_scan_overrun_tail() {
    let (_temp, path) = setup_temp_segment();
    let complete = encode_record(RecordOp::Put, "k1", "", b"value");
    let torn = encode_record(RecordOp::Put, "k2", "", &[1u8; 64]);
    append_bytes(&path, &complete);
    append_bytes(&path, &torn[..torn.len() - 20]);

    let (seen, outcome) = scan_all(&path, 0);
    let outcome = outcome.unwrap();

    assert_eq!(seen.len(), 1);
    assert_eq!(outcome.end, complete.len() as u64);
    match outcome.stop {
        Some(ScanStop::Overrun { offset, declared_len }) => {
            assert_eq!(offset, complete.len() as u64);
            assert_eq!(declared_len, Some(torn.len() as u64));
        }
        other => panic!("expected overrun, got {:?}", other),
    }
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_scan_bad_magic_is_fatal() {
    let (_temp, path) = setup_temp_segment();
    let good = encode_record(RecordOp::Put, "k", "", b"v");
    append_bytes(&path, &good);
    append_bytes(&path, &[0u8; HEADER_SIZE * 2]);

    let (_, outcome) = scan_all(&path, 0);
    let err = outcome.unwrap_err();

    assert!(err.is_corrupt());
    match err {
        segvault::VaultError::CorruptRecord { segment, offset, .. } => {
            assert_eq!(segment, "seg-0000-000000000001.log");
            assert_eq!(offset, good.len() as u64);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_scan_start_beyond_end() {
    let (_temp, path) = setup_temp_segment();
    append_bytes(&path, &encode_record(RecordOp::Put, "k", "", b"v"));

    let (_, outcome) = scan_all(&path, 10_000);
    assert!(outcome.unwrap_err().is_corrupt());
}
