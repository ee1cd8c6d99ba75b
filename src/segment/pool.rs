//! Segment Reader Pool
//!
//! Read handles are expensive to open and cheap to keep. Each (shard,
//! segment) pair has a lock-free queue of idle handles; a checked-out handle
//! goes back to its queue on drop until the pool is closed.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use tracing::debug;

use super::segment_path;
use crate::error::{io_context, Result, VaultError};

type IdleQueue = Arc<SegQueue<File>>;

/// Pool of read-only segment handles
pub struct ReaderPool {
    dir: PathBuf,
    idle: Mutex<HashMap<(usize, u64), IdleQueue>>,
    closed: Arc<AtomicBool>,
}

impl ReaderPool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            idle: Mutex::new(HashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check out a handle for a segment, opening one if none is idle
    pub fn get(&self, shard: usize, segment_id: u64) -> Result<PooledFile> {
        if self.closed.load(Ordering::Acquire) {
            return Err(VaultError::Closed);
        }

        let queue = {
            let mut idle = self.idle.lock();
            Arc::clone(idle.entry((shard, segment_id)).or_default())
        };

        let file = match queue.pop() {
            Some(file) => file,
            None => {
                let path = segment_path(&self.dir, shard, segment_id);
                File::open(&path).map_err(io_context(format!("open segment {}", path.display())))?
            }
        };

        Ok(PooledFile {
            file: Some(file),
            home: queue,
            closed: Arc::clone(&self.closed),
        })
    }

    /// Number of idle handles across all segments
    pub fn idle_count(&self) -> usize {
        self.idle.lock().values().map(|q| q.len()).sum()
    }

    /// Close every idle handle. Handles still checked out are closed when
    /// they are dropped.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        let queues: Vec<IdleQueue> = self.idle.lock().drain().map(|(_, q)| q).collect();
        let mut closed = 0usize;
        for queue in queues {
            while queue.pop().is_some() {
                closed += 1;
            }
        }
        debug!(dir = %self.dir.display(), closed, "Closed segment reader pool");
    }
}

/// A segment handle on loan from a [`ReaderPool`]
pub struct PooledFile {
    file: Option<File>,
    home: IdleQueue,
    closed: Arc<AtomicBool>,
}

impl PooledFile {
    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "pooled file already released"))
    }
}

impl Drop for PooledFile {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if !self.closed.load(Ordering::Acquire) {
                self.home.push(file);
            }
        }
    }
}

// =============================================================================
// Range Reader
// =============================================================================

/// Reads `[start, end)` of a segment through a pooled handle
pub struct SegmentRangeReader {
    file: PooledFile,
    pos: u64,
    end: u64,
    positioned: bool,
}

impl SegmentRangeReader {
    pub fn new(file: PooledFile, start: u64, len: u64) -> Self {
        Self {
            file,
            pos: start,
            end: start.saturating_add(len),
            positioned: false,
        }
    }

    /// Bytes left to read
    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.pos)
    }
}

impl Read for SegmentRangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        if !self.positioned {
            let pos = self.pos;
            self.file.file()?.seek(SeekFrom::Start(pos))?;
            self.positioned = true;
        }
        let want = remaining.min(buf.len() as u64) as usize;
        let n = self.file.file()?.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "segment ended before the object",
            ));
        }
        self.pos += n as u64;
        Ok(n)
    }
}
