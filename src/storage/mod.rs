//! Storage Contract
//!
//! The backend-neutral bucket/key interface the engine implements.
//! Transports and applications program against these traits and never see
//! segments, indexes or manifests.
//!
//! ## Capabilities
//! Mandatory operations live on [`Bucket`]. Multipart uploads are a separate
//! trait, [`MultipartBucket`], discovered at runtime through
//! [`Bucket::as_multipart`] instead of downcasting.

mod types;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, VaultError};

pub use types::{
    BucketInfo, CancelToken, Features, MultipartUpload, Object, Options, PartInfo,
};

/// Streaming reader returned by [`Bucket::open`]
pub type ObjectReader = Box<dyn Read + Send>;

/// Sorted object listing returned by [`Bucket::list`]
pub type ObjectIter = Box<dyn Iterator<Item = Object> + Send>;

/// A collection of buckets
pub trait Storage: Send + Sync {
    /// Get a bucket handle (no I/O; existence is checked on first use)
    fn bucket(&self, name: &str) -> Arc<dyn Bucket>;

    fn create_bucket(&self, name: &str, opts: &Options) -> Result<BucketInfo>;

    /// Delete a bucket; non-empty buckets need `opts.recursive`
    fn delete_bucket(&self, name: &str, opts: &Options) -> Result<()>;

    fn list_buckets(&self, opts: &Options) -> Result<Vec<BucketInfo>>;

    fn features(&self) -> Features;

    /// Flush state and release every open file
    fn close(&self) -> Result<()>;
}

/// Mandatory object operations
pub trait Bucket: Send + Sync {
    fn name(&self) -> &str;

    fn info(&self, opts: &Options) -> Result<BucketInfo>;

    fn features(&self) -> Features;

    /// Store `src` under `key`. `size` is `None` when unknown.
    fn write(
        &self,
        key: &str,
        src: &mut dyn Read,
        size: Option<u64>,
        content_type: &str,
        opts: &Options,
    ) -> Result<Object>;

    /// Read a byte range. `offset < 0` clamps to 0, `length <= 0` reads to the end.
    fn open(
        &self,
        key: &str,
        offset: i64,
        length: i64,
        opts: &Options,
    ) -> Result<(ObjectReader, Object)>;

    fn stat(&self, key: &str, opts: &Options) -> Result<Object>;

    fn delete(&self, key: &str, opts: &Options) -> Result<()>;

    /// Copy `src_bucket/src_key` to `dst_key` in this bucket.
    /// An empty `src_bucket` means this bucket.
    fn copy(&self, dst_key: &str, src_bucket: &str, src_key: &str, opts: &Options)
        -> Result<Object>;

    fn move_object(
        &self,
        dst_key: &str,
        src_bucket: &str,
        src_key: &str,
        opts: &Options,
    ) -> Result<Object>;

    fn list(&self, prefix: &str, limit: usize, offset: usize, opts: &Options)
        -> Result<ObjectIter>;

    fn signed_url(
        &self,
        _key: &str,
        _method: &str,
        _expires: Duration,
        _opts: &Options,
    ) -> Result<String> {
        Err(VaultError::Unsupported("signed URLs".to_string()))
    }

    /// Capability query for multipart uploads
    fn as_multipart(&self) -> Option<&dyn MultipartBucket> {
        None
    }
}

/// Optional multipart upload capability
pub trait MultipartBucket: Bucket {
    fn init_multipart(&self, key: &str, content_type: &str, opts: &Options)
        -> Result<MultipartUpload>;

    fn upload_part(
        &self,
        upload: &MultipartUpload,
        number: u32,
        src: &mut dyn Read,
        size: Option<u64>,
        opts: &Options,
    ) -> Result<PartInfo>;

    /// Copy a byte range of an existing object into a part.
    /// `length <= 0` copies to the end of the source.
    #[allow(clippy::too_many_arguments)]
    fn copy_part(
        &self,
        upload: &MultipartUpload,
        number: u32,
        src_bucket: &str,
        src_key: &str,
        offset: i64,
        length: i64,
        opts: &Options,
    ) -> Result<PartInfo>;

    fn list_parts(
        &self,
        upload: &MultipartUpload,
        limit: usize,
        offset: usize,
        opts: &Options,
    ) -> Result<Vec<PartInfo>>;

    fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[PartInfo],
        opts: &Options,
    ) -> Result<Object>;

    fn abort_multipart(&self, upload: &MultipartUpload, opts: &Options) -> Result<()>;
}
