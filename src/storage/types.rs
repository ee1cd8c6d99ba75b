//! Storage contract value types
//!
//! Plain data exchanged across the [`Bucket`](super::Bucket) boundary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Result, VaultError};

/// Metadata describing a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub updated: SystemTime,
    /// Hex CRC32 of the object data (empty for directories)
    pub etag: String,
    /// Synthetic directory reported by `stat("dir/")`
    pub is_dir: bool,
}

/// Bucket metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub created: SystemTime,
}

/// Capabilities advertised by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    pub multipart: bool,
    pub server_side_copy: bool,
    pub server_side_move: bool,
    pub directories: bool,
    pub signed_url: bool,
}

/// Cooperative cancellation flag shared between a caller and the engine.
///
/// The engine only checks it on entry to each operation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Delete: include every key below `key/`. List: descend into sub-paths.
    /// Bucket delete: remove a non-empty bucket.
    pub recursive: Option<bool>,
    /// Free-form metadata (multipart uploads keep it)
    pub metadata: BTreeMap<String, String>,
    pub cancel: Option<CancelToken>,
}

impl Options {
    pub fn recursive(value: bool) -> Self {
        Self {
            recursive: Some(value),
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Return early if the caller already gave up.
    pub fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(VaultError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Handle for an in-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
    pub created: SystemTime,
}

/// A single uploaded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub number: u32,
    pub size: u64,
    pub etag: String,
    pub last_modified: SystemTime,
}

impl PartInfo {
    /// Reference a part by number only (no ETag verification on completion).
    pub fn numbered(number: u32) -> Self {
        Self {
            number,
            size: 0,
            etag: String::new(),
            last_modified: SystemTime::UNIX_EPOCH,
        }
    }
}
