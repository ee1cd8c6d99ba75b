//! Segment Writer
//!
//! Owns the active segment file of one shard. All mutation goes through a
//! [`ShardGuard`], which holds the shard mutex for the whole append.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::MutexGuard;
use tracing::{debug, warn};

use super::{segment_path, SegmentTail};
use crate::config::SyncStrategy;
use crate::error::{io_context, Result, VaultError};
use crate::record::{RecordHeader, RecordOp, HEADER_SIZE, UNKNOWN_DATA_LEN};

/// Records up to this size are assembled in the shard's reusable buffer and
/// written with a single call.
pub const INLINE_RECORD_MAX: u64 = 256 * 1024;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Where a record landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub shard: usize,
    pub segment_id: u64,
    /// Offset of the record header
    pub offset: u64,
    /// Offset of the first data byte
    pub data_offset: u64,
    pub data_len: u64,
    pub checksum: u32,
}

/// Active segment of one shard
pub(crate) struct SegmentWriter {
    shard: usize,
    id: u64,
    file: File,
    size: u64,
    buf: Vec<u8>,
}

impl SegmentWriter {
    /// Create a brand new, empty segment
    pub(crate) fn create(dir: &Path, shard: usize, id: u64) -> Result<Self> {
        let path = segment_path(dir, shard, id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_context(format!("create segment {}", path.display())))?;
        Ok(Self {
            shard,
            id,
            file,
            size: 0,
            buf: Vec::new(),
        })
    }

    /// Reopen an existing segment for appending. Bytes past `valid_len` are
    /// an unfinished append and are cut off.
    pub(crate) fn resume(dir: &Path, shard: usize, id: u64, valid_len: u64) -> Result<Self> {
        let path = segment_path(dir, shard, id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_context(format!("open segment {}", path.display())))?;
        let len = file
            .metadata()
            .map_err(io_context(format!("stat segment {}", path.display())))?
            .len();

        if len > valid_len {
            warn!(
                segment = %path.display(),
                valid_len,
                dropped = len - valid_len,
                "Truncating torn segment tail"
            );
            file.set_len(valid_len)
                .map_err(io_context(format!("truncate segment {}", path.display())))?;
        }

        Ok(Self {
            shard,
            id,
            file,
            size: valid_len.min(len),
            buf: Vec::new(),
        })
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)
    }

    /// Drop the bytes of a failed append
    fn rollback(&mut self, start: u64) {
        if let Err(e) = self.file.set_len(start) {
            warn!(shard = self.shard, segment = self.id, start, error = %e, "Failed to roll back partial append");
        }
    }

    pub(crate) fn file_sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn tail(&self) -> SegmentTail {
        SegmentTail {
            shard: self.shard,
            id: self.id,
            size: self.size,
        }
    }
}

// =============================================================================
// Shard Guard
// =============================================================================

/// Exclusive access to one shard's active segment.
///
/// Offset allocation, the write itself and the optional fsync all happen
/// while this guard is held. Callers update the index before releasing it so
/// that a tail captured under the same lock never runs ahead of the index.
pub struct ShardGuard<'a> {
    pub(crate) writer: MutexGuard<'a, SegmentWriter>,
    pub(crate) dir: &'a Path,
    pub(crate) sync: SyncStrategy,
    pub(crate) max_segment_size: u64,
}

impl<'a> ShardGuard<'a> {
    pub fn shard(&self) -> usize {
        self.writer.shard
    }

    /// Current (segment id, size) of the active segment
    pub fn tail(&self) -> SegmentTail {
        self.writer.tail()
    }

    /// Close the active segment and start `id + 1`
    pub fn rotate(&mut self) -> Result<()> {
        if self.sync.should_sync() {
            self.writer
                .file
                .sync_data()
                .map_err(io_context("sync segment before rotation"))?;
        }
        let next = SegmentWriter::create(self.dir, self.writer.shard, self.writer.id + 1)?;
        debug!(
            shard = next.shard,
            from = self.writer.id,
            to = next.id,
            size = self.writer.size,
            "Rotated segment"
        );
        *self.writer = next;
        Ok(())
    }

    fn rotate_if_needed(&mut self, projected: u64) -> Result<()> {
        let size = self.writer.size;
        if self.max_segment_size > 0
            && size > 0
            && size.saturating_add(projected) > self.max_segment_size
        {
            self.rotate()?;
        }
        Ok(())
    }

    fn sync_if_needed(&mut self) -> io::Result<()> {
        if self.sync.should_sync() {
            self.writer.file.sync_data()?;
        }
        Ok(())
    }

    /// Append a complete record in one pass
    pub fn append(
        &mut self,
        op: RecordOp,
        key: &str,
        content_type: &str,
        data: &[u8],
        checksum: u32,
        updated_ns: i64,
    ) -> Result<RecordLocation> {
        let header = RecordHeader::new(op, key, content_type, data.len() as u64, updated_ns, checksum)?;
        let total = header
            .record_len()
            .ok_or_else(|| VaultError::InvalidInput("record too large".to_string()))?;

        self.rotate_if_needed(total)?;
        let start = self.writer.size;

        let written = if total <= INLINE_RECORD_MAX {
            let writer = &mut *self.writer;
            writer.buf.clear();
            writer.buf.extend_from_slice(&header.encode());
            writer.buf.extend_from_slice(key.as_bytes());
            writer.buf.extend_from_slice(content_type.as_bytes());
            writer.buf.extend_from_slice(data);
            let buf = std::mem::take(&mut writer.buf);
            let res = writer.write_at(start, &buf);
            writer.buf = buf;
            res
        } else {
            self.writer.write_at(start, &header.encode()).and_then(|_| {
                let file = &mut self.writer.file;
                file.write_all(key.as_bytes())?;
                file.write_all(content_type.as_bytes())?;
                file.write_all(data)
            })
        };

        if let Err(e) = written.and_then(|_| self.sync_if_needed()) {
            self.writer.rollback(start);
            return Err(io_context(format!(
                "append to shard {} segment {}",
                self.writer.shard, self.writer.id
            ))(e));
        }

        self.writer.size = start + total;
        let data_offset = start + HEADER_SIZE as u64 + header.payload_prefix_len();
        Ok(RecordLocation {
            shard: self.writer.shard,
            segment_id: self.writer.id,
            offset: start,
            data_offset,
            data_len: data.len() as u64,
            checksum,
        })
    }

    /// Start a streamed `Put` record.
    ///
    /// The header goes out first with the [`UNKNOWN_DATA_LEN`] placeholder
    /// and a zero checksum, so a record cut short before
    /// [`PendingRecord::finish`] scans as a torn tail even when its size was
    /// known. The size hint only decides whether to rotate first. The returned
    /// [`PendingRecord`] borrows this guard, so the header can only be patched
    /// while the shard is still locked and the record is still the tail.
    pub fn begin_stream<'g>(
        &'g mut self,
        key: &str,
        content_type: &str,
        size_hint: Option<u64>,
        updated_ns: i64,
    ) -> Result<PendingRecord<'g, 'a>> {
        let header = RecordHeader::new(
            RecordOp::Put,
            key,
            content_type,
            UNKNOWN_DATA_LEN,
            updated_ns,
            0,
        )?;
        let prefix = HEADER_SIZE as u64 + header.payload_prefix_len();
        self.rotate_if_needed(prefix.saturating_add(size_hint.unwrap_or(0)))?;

        let start = self.writer.size;
        let writer = &mut *self.writer;
        writer.buf.clear();
        writer.buf.extend_from_slice(&header.encode());
        writer.buf.extend_from_slice(key.as_bytes());
        writer.buf.extend_from_slice(content_type.as_bytes());
        let buf = std::mem::take(&mut writer.buf);
        let res = writer.write_at(start, &buf);
        writer.buf = buf;
        if let Err(e) = res {
            writer.rollback(start);
            return Err(io_context("write streamed record header")(e));
        }

        Ok(PendingRecord {
            guard: self,
            header,
            start,
            data_offset: start + prefix,
            written: 0,
            hasher: crc32fast::Hasher::new(),
            finished: false,
        })
    }
}

// =============================================================================
// Pending Record
// =============================================================================

/// A streamed record whose header has not been finalized yet.
///
/// Dropping it without calling [`PendingRecord::finish`] removes the partial
/// record from the segment.
pub struct PendingRecord<'g, 'a> {
    guard: &'g mut ShardGuard<'a>,
    header: RecordHeader,
    start: u64,
    data_offset: u64,
    written: u64,
    hasher: crc32fast::Hasher,
    finished: bool,
}

impl PendingRecord<'_, '_> {
    /// Copy from `src` until EOF or until `limit` bytes have been written.
    /// Returns the number of bytes copied by this call.
    pub fn copy_from(&mut self, src: &mut dyn Read, limit: Option<u64>) -> Result<u64> {
        let mut chunk = vec![0u8; STREAM_CHUNK_SIZE];
        let mut copied = 0u64;
        let writer = &mut *self.guard.writer;
        writer
            .file
            .seek(SeekFrom::Start(self.data_offset + self.written))
            .map_err(io_context("seek streamed record"))?;

        loop {
            let want = match limit {
                Some(limit) => (limit - copied).min(STREAM_CHUNK_SIZE as u64) as usize,
                None => STREAM_CHUNK_SIZE,
            };
            if want == 0 {
                break;
            }
            let n = match src.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_context("read object source")(e)),
            };
            writer
                .file
                .write_all(&chunk[..n])
                .map_err(io_context("stream record data"))?;
            self.hasher.update(&chunk[..n]);
            copied += n as u64;
            self.written += n as u64;
        }
        Ok(copied)
    }

    /// Bytes streamed so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Patch the header with the final length and checksum, sync, and make
    /// the record part of the segment.
    pub fn finish(mut self) -> Result<RecordLocation> {
        self.header.data_len = self.written;
        self.header.checksum = std::mem::take(&mut self.hasher).finalize();

        let start = self.start;
        let encoded = self.header.encode();
        self.guard
            .writer
            .write_at(start, &encoded)
            .and_then(|_| self.guard.sync_if_needed())
            .map_err(io_context("patch streamed record header"))?;

        let writer = &mut *self.guard.writer;
        writer.size = self.data_offset + self.written;
        self.finished = true;

        Ok(RecordLocation {
            shard: writer.shard,
            segment_id: writer.id,
            offset: start,
            data_offset: self.data_offset,
            data_len: self.written,
            checksum: self.header.checksum,
        })
    }
}

impl Drop for PendingRecord<'_, '_> {
    fn drop(&mut self) {
        if !self.finished {
            self.guard.writer.rollback(self.start);
        }
    }
}
