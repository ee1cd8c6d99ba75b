//! Log-structured bucket
//!
//! One directory, N shard segment chains, one in-memory index. The bucket is
//! loaded lazily on first use; every concurrent caller waits for that single
//! load and sees its result.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, Bytes};
use tracing::{debug, info};

use super::iter::LazyObjectIter;
use super::store::StoreShared;
use super::{apply_offset_limit, object_from_entry, read_up_to, MULTIPART_DIR};
use crate::cache::{CacheStamp, SmallObjectCache};
use crate::config::Config;
use crate::error::{io_context, Result, VaultError};
use crate::index::{unix_ns, IndexEntry, KeyIndex};
use crate::key::{clean_key, clean_prefix, is_dir_query, safe_bucket_name};
use crate::manifest::{recover, Manifest, ManifestWriter, RecoveryMode, RecoveryReport, MANIFEST_FILE, SEGMENT_DIR};
use crate::multipart::MultipartManager;
use crate::record::RecordOp;
use crate::segment::{SegmentManager, INLINE_RECORD_MAX};
use crate::storage::{
    Bucket, BucketInfo, Features, MultipartBucket, MultipartUpload, Object, ObjectIter,
    ObjectReader, Options, PartInfo,
};

/// Capabilities of the log-structured engine
pub(crate) const FEATURES: Features = Features {
    multipart: true,
    server_side_copy: true,
    server_side_move: true,
    directories: true,
    signed_url: false,
};

// =============================================================================
// Bucket Core
// =============================================================================

/// Everything that exists once a bucket has been loaded
pub(crate) struct BucketCore {
    pub(crate) segments: SegmentManager,
    pub(crate) index: KeyIndex,
    pub(crate) manifest: ManifestWriter,
    pub(crate) multipart: MultipartManager,
    pub(crate) report: RecoveryReport,
    closed: AtomicBool,
}

impl BucketCore {
    /// Consistent snapshot: tails first (each under its shard lock), then
    /// the index. Replaying from those tails converges on the same state.
    fn capture_manifest(&self) -> Manifest {
        let tails = self.segments.tails();
        Manifest::new(self.segments.shard_count(), tails, self.index.snapshot())
    }

    fn maybe_write_manifest(&self) {
        self.manifest.maybe_write(|| self.capture_manifest());
    }

    fn write_manifest(&self) -> Result<()> {
        self.manifest.write_now(|| self.capture_manifest())
    }

    /// Final manifest, sync, release handles
    pub(crate) fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let manifest = self.write_manifest();
        let segments = self.segments.close();
        manifest.and(segments)
    }

    /// Release handles without writing anything (bucket is being deleted)
    pub(crate) fn discard(&self) {
        self.closed.store(true, Ordering::Release);
        self.segments.readers().close_all();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

type LoadResult = std::result::Result<Arc<BucketCore>, Arc<VaultError>>;

// =============================================================================
// Log Bucket
// =============================================================================

/// A bucket backed by append-only segment files
pub struct LogBucket {
    name: String,
    dir: PathBuf,
    config: Arc<Config>,
    cache: Arc<SmallObjectCache>,
    store: Weak<StoreShared>,
    core: OnceLock<LoadResult>,
    deleted: AtomicBool,
}

impl LogBucket {
    pub(crate) fn new(
        name: &str,
        dir: PathBuf,
        config: Arc<Config>,
        cache: Arc<SmallObjectCache>,
        store: Weak<StoreShared>,
    ) -> Self {
        Self {
            name: name.to_string(),
            dir,
            config,
            cache,
            store,
            core: OnceLock::new(),
            deleted: AtomicBool::new(false),
        }
    }

    /// Loaded state, loading it on first use.
    ///
    /// A missing bucket directory is reported without consuming the load,
    /// so a later `create_bucket` makes this handle usable.
    pub(crate) fn core(&self) -> Result<Arc<BucketCore>> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(VaultError::NotExist);
        }
        if self.store.upgrade().map_or(true, |store| store.is_closed()) {
            return Err(VaultError::Closed);
        }
        if self.core.get().is_none() && !self.dir.is_dir() {
            return Err(VaultError::NotExist);
        }

        let loaded = self
            .core
            .get_or_init(|| self.load().map(Arc::new).map_err(Arc::new));
        match loaded {
            Ok(core) if core.is_closed() => Err(VaultError::Closed),
            Ok(core) => Ok(Arc::clone(core)),
            Err(e) => Err(VaultError::Shared(Arc::clone(e))),
        }
    }

    /// Loaded state if the bucket was ever loaded successfully
    pub(crate) fn loaded_core(&self) -> Option<Arc<BucketCore>> {
        match self.core.get() {
            Some(Ok(core)) => Some(Arc::clone(core)),
            _ => None,
        }
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    fn load(&self) -> Result<BucketCore> {
        let config = &self.config;
        let index = KeyIndex::new(config.index_partitions, config.prefix_depth);

        let (layout, report) = recover(&self.dir, config.segment_shards, index.entries())?;
        index.rebuild_prefixes();

        let segments = SegmentManager::open(
            self.dir.join(SEGMENT_DIR),
            &layout.tails,
            config.sync_strategy,
            config.max_segment_size,
        )?;
        let manifest = ManifestWriter::new(
            self.dir.join(MANIFEST_FILE),
            config.manifest_interval,
            config.sync_strategy,
            report.mode == RecoveryMode::Manifest,
        );
        let multipart =
            MultipartManager::load(&self.name, self.dir.join(MULTIPART_DIR), config.sync_strategy)?;

        Ok(BucketCore {
            segments,
            index,
            manifest,
            multipart,
            report,
            closed: AtomicBool::new(false),
        })
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// How the bucket was loaded
    pub fn recovery_report(&self) -> Result<RecoveryReport> {
        Ok(self.core()?.report.clone())
    }

    /// Copy of the whole index
    pub fn index_snapshot(&self) -> Result<BTreeMap<String, IndexEntry>> {
        Ok(self.core()?.index.snapshot())
    }

    /// Number of write shards
    pub fn shard_count(&self) -> Result<usize> {
        Ok(self.core()?.segments.shard_count())
    }

    /// Write a manifest now, regardless of the throttle
    pub fn flush_manifest(&self) -> Result<()> {
        self.core()?.write_manifest()
    }

    /// In-flight multipart uploads
    pub fn uploads(&self) -> Result<Vec<MultipartUpload>> {
        Ok(self.core()?.multipart.uploads())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn object(&self, key: &str, entry: &IndexEntry) -> Object {
        object_from_entry(&self.name, key, entry)
    }

    /// Resolve `src_bucket` for copy/move. `None` means this bucket.
    fn source_bucket(&self, src_bucket: &str) -> Result<Option<Arc<LogBucket>>> {
        if src_bucket.trim().is_empty() {
            return Ok(None);
        }
        let name = safe_bucket_name(src_bucket);
        if name == self.name {
            return Ok(None);
        }
        let store = self.store.upgrade().ok_or(VaultError::Closed)?;
        Ok(Some(store.handle(&name)))
    }

    fn open_source(
        &self,
        src_bucket: &str,
        src_key: &str,
        offset: i64,
        length: i64,
        opts: &Options,
    ) -> Result<(ObjectReader, Object)> {
        match self.source_bucket(src_bucket)? {
            Some(other) => other.open(src_key, offset, length, opts),
            None => self.open(src_key, offset, length, opts),
        }
    }

    /// Append a `Put` for an already cleaned key and publish it
    fn write_object(
        &self,
        core: &BucketCore,
        key: &str,
        src: &mut dyn Read,
        size: Option<u64>,
        content_type: &str,
    ) -> Result<Object> {
        let updated_ns = unix_ns(SystemTime::now());
        let shard = core.segments.shard_for(key);
        let buffered_limit = INLINE_RECORD_MAX.max(self.cache.max_item());

        let entry = match size {
            Some(size) if size <= buffered_limit => {
                let data = Bytes::from(
                    read_up_to(src, size).map_err(io_context("read object source"))?,
                );
                let checksum = crc32fast::hash(&data);
                let entry = {
                    let mut guard = core.segments.lock(shard);
                    let location =
                        guard.append(RecordOp::Put, key, content_type, &data, checksum, updated_ns)?;
                    let entry = IndexEntry::from_location(&location, content_type, updated_ns);
                    core.index.insert(key, entry.clone());
                    entry
                };
                if self.cache.accepts(entry.size) {
                    self.cache.put(&self.name, key, CacheStamp::from(&entry), data);
                } else {
                    self.cache.delete(&self.name, key);
                }
                entry
            }
            _ => {
                let entry = {
                    let mut guard = core.segments.lock(shard);
                    let mut pending = guard.begin_stream(key, content_type, size, updated_ns)?;
                    pending.copy_from(src, size)?;
                    let location = pending.finish()?;
                    let entry = IndexEntry::from_location(&location, content_type, updated_ns);
                    core.index.insert(key, entry.clone());
                    entry
                };
                self.cache.delete(&self.name, key);
                entry
            }
        };

        core.maybe_write_manifest();
        Ok(self.object(key, &entry))
    }

    /// Append a `Delete` for a cleaned key. Returns false if the key is absent.
    fn delete_key(&self, core: &BucketCore, key: &str) -> Result<bool> {
        let shard = core.segments.shard_for(key);
        {
            let mut guard = core.segments.lock(shard);
            if core.index.get(key).is_none() {
                return Ok(false);
            }
            guard.append(RecordOp::Delete, key, "", &[], 0, unix_ns(SystemTime::now()))?;
            core.index.remove(key);
        }
        self.cache.delete(&self.name, key);
        Ok(true)
    }

    /// Read a whole small object through the segment log and cache it
    fn load_into_cache(&self, core: &BucketCore, key: &str, entry: &IndexEntry) -> Result<Bytes> {
        let mut reader = core
            .segments
            .read_range(entry.shard, entry.segment_id, entry.offset, entry.size)?;
        let mut data = Vec::with_capacity(entry.size as usize);
        reader
            .read_to_end(&mut data)
            .map_err(io_context(format!("read {}", key)))?;
        let data = Bytes::from(data);
        self.cache.put(&self.name, key, CacheStamp::from(entry), data.clone());
        Ok(data)
    }

    /// Synthetic directory object for `prefix` (ending in `/`)
    fn directory_object(&self, core: &BucketCore, prefix: &str) -> Option<Object> {
        let keys = core.index.keys_with_prefix(prefix);
        let updated = keys
            .iter()
            .filter_map(|k| core.index.get(k))
            .map(|e| e.updated())
            .max()?;
        Some(Object {
            bucket: self.name.clone(),
            key: prefix.to_string(),
            size: 0,
            content_type: String::new(),
            updated,
            etag: String::new(),
            is_dir: true,
        })
    }

    /// Listing prefix: cleaned, keeping a trailing `/` when the caller gave one
    fn list_prefix(prefix: &str) -> Result<String> {
        let cleaned = clean_prefix(prefix)?;
        if !cleaned.is_empty() && is_dir_query(prefix) {
            return Ok(format!("{}/", cleaned));
        }
        Ok(cleaned)
    }

    fn dir_created(&self) -> SystemTime {
        std::fs::metadata(&self.dir)
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .unwrap_or(UNIX_EPOCH)
    }
}

// =============================================================================
// Bucket Contract
// =============================================================================

impl Bucket for LogBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self, opts: &Options) -> Result<BucketInfo> {
        opts.check_cancelled()?;
        self.core()?;
        Ok(BucketInfo {
            name: self.name.clone(),
            created: self.dir_created(),
        })
    }

    fn features(&self) -> Features {
        FEATURES
    }

    fn write(
        &self,
        key: &str,
        src: &mut dyn Read,
        size: Option<u64>,
        content_type: &str,
        opts: &Options,
    ) -> Result<Object> {
        opts.check_cancelled()?;
        let key = clean_key(key)?;
        let core = self.core()?;
        self.write_object(&core, &key, src, size, content_type)
    }

    fn open(
        &self,
        key: &str,
        offset: i64,
        length: i64,
        opts: &Options,
    ) -> Result<(ObjectReader, Object)> {
        opts.check_cancelled()?;
        let key = clean_key(key)?;
        let core = self.core()?;
        let entry = core.index.get(&key).ok_or(VaultError::NotExist)?;

        let offset = offset.max(0) as u64;
        if offset > entry.size {
            return Err(VaultError::NotExist);
        }
        let available = entry.size - offset;
        let len = if length <= 0 {
            available
        } else {
            (length as u64).min(available)
        };
        let object = self.object(&key, &entry);

        let cached = match self.cache.get(&self.name, &key, CacheStamp::from(&*entry)) {
            Some(data) => Some(data),
            None if self.cache.accepts(entry.size) => Some(self.load_into_cache(&core, &key, &entry)?),
            None => None,
        };
        if let Some(data) = cached {
            let body = data.slice(offset as usize..(offset + len) as usize);
            return Ok((Box::new(body.reader()), object));
        }

        let reader = core
            .segments
            .read_range(entry.shard, entry.segment_id, entry.offset + offset, len)?;
        Ok((Box::new(reader), object))
    }

    fn stat(&self, key: &str, opts: &Options) -> Result<Object> {
        opts.check_cancelled()?;
        let dir_query = is_dir_query(key);
        let key = clean_key(key)?;
        let core = self.core()?;

        if dir_query {
            if let Some(dir) = self.directory_object(&core, &format!("{}/", key)) {
                return Ok(dir);
            }
        }
        let entry = core.index.get(&key).ok_or(VaultError::NotExist)?;
        Ok(self.object(&key, &entry))
    }

    fn delete(&self, key: &str, opts: &Options) -> Result<()> {
        opts.check_cancelled()?;
        let key = clean_key(key)?;
        let core = self.core()?;

        let mut removed = self.delete_key(&core, &key)?;
        if opts.recursive.unwrap_or(false) {
            for child in core.index.keys_with_prefix(&format!("{}/", key)) {
                removed |= self.delete_key(&core, &child)?;
            }
        }
        if !removed {
            return Err(VaultError::NotExist);
        }
        core.maybe_write_manifest();
        Ok(())
    }

    fn copy(&self, dst_key: &str, src_bucket: &str, src_key: &str, opts: &Options) -> Result<Object> {
        opts.check_cancelled()?;
        let dst_key = clean_key(dst_key)?;
        let core = self.core()?;
        let (mut reader, source) = self.open_source(src_bucket, src_key, 0, 0, opts)?;
        self.write_object(&core, &dst_key, &mut reader, Some(source.size), &source.content_type)
    }

    fn move_object(
        &self,
        dst_key: &str,
        src_bucket: &str,
        src_key: &str,
        opts: &Options,
    ) -> Result<Object> {
        opts.check_cancelled()?;
        let source = self.source_bucket(src_bucket)?;
        if source.is_none() && clean_key(dst_key)? == clean_key(src_key)? {
            return self.stat(dst_key, opts);
        }

        let object = self.copy(dst_key, src_bucket, src_key, opts)?;
        let delete_opts = Options::default();
        let deleted = match &source {
            Some(other) => other.delete(src_key, &delete_opts),
            None => self.delete(src_key, &delete_opts),
        };
        match deleted {
            Ok(()) => Ok(object),
            // Someone else removed the source first; the copy still stands
            Err(e) if e.is_not_exist() => Ok(object),
            Err(e) => Err(e),
        }
    }

    fn list(&self, prefix: &str, limit: usize, offset: usize, opts: &Options) -> Result<ObjectIter> {
        opts.check_cancelled()?;
        let prefix = Self::list_prefix(prefix)?;
        let core = self.core()?;

        let mut keys = core.index.keys_with_prefix(&prefix);
        if !opts.recursive.unwrap_or(true) {
            keys.retain(|k| !k[prefix.len()..].contains('/'));
        }
        let keys = apply_offset_limit(keys, offset, limit);
        Ok(Box::new(LazyObjectIter::new(&self.name, core, keys)))
    }

    fn as_multipart(&self) -> Option<&dyn MultipartBucket> {
        Some(self)
    }
}

// =============================================================================
// Multipart Contract
// =============================================================================

impl LogBucket {
    fn check_upload(&self, upload: &MultipartUpload) -> Result<()> {
        if upload.bucket != self.name {
            return Err(VaultError::InvalidInput(format!(
                "upload {} belongs to bucket {}",
                upload.upload_id, upload.bucket
            )));
        }
        Ok(())
    }
}

impl MultipartBucket for LogBucket {
    fn init_multipart(&self, key: &str, content_type: &str, opts: &Options) -> Result<MultipartUpload> {
        opts.check_cancelled()?;
        let key = clean_key(key)?;
        let core = self.core()?;
        let upload = core.multipart.init(&key, content_type, opts.metadata.clone())?;
        debug!(bucket = %self.name, key = %key, upload_id = %upload.upload_id, "Multipart upload started");
        Ok(upload)
    }

    fn upload_part(
        &self,
        upload: &MultipartUpload,
        number: u32,
        src: &mut dyn Read,
        size: Option<u64>,
        opts: &Options,
    ) -> Result<PartInfo> {
        opts.check_cancelled()?;
        self.check_upload(upload)?;
        let core = self.core()?;
        core.multipart.upload_part(&upload.upload_id, number, src, size)
    }

    fn copy_part(
        &self,
        upload: &MultipartUpload,
        number: u32,
        src_bucket: &str,
        src_key: &str,
        offset: i64,
        length: i64,
        opts: &Options,
    ) -> Result<PartInfo> {
        opts.check_cancelled()?;
        self.check_upload(upload)?;
        let core = self.core()?;
        // Fail on an unknown upload before reading the source
        core.multipart.get(&upload.upload_id)?;
        let (mut reader, _) = self.open_source(src_bucket, src_key, offset, length, opts)?;
        core.multipart.upload_part(&upload.upload_id, number, &mut reader, None)
    }

    fn list_parts(
        &self,
        upload: &MultipartUpload,
        limit: usize,
        offset: usize,
        opts: &Options,
    ) -> Result<Vec<PartInfo>> {
        opts.check_cancelled()?;
        self.check_upload(upload)?;
        self.core()?.multipart.list_parts(&upload.upload_id, limit, offset)
    }

    fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[PartInfo],
        opts: &Options,
    ) -> Result<Object> {
        opts.check_cancelled()?;
        self.check_upload(upload)?;
        let core = self.core()?;

        let plan = core.multipart.plan_completion(&upload.upload_id, parts)?;
        let mut reader = plan.reader();
        let object = self.write_object(
            &core,
            &plan.upload.key,
            &mut reader,
            Some(plan.total_size),
            &plan.upload.content_type,
        )?;
        core.multipart.finish(&upload.upload_id)?;

        info!(
            bucket = %self.name,
            key = %object.key,
            upload_id = %upload.upload_id,
            parts = plan.paths.len(),
            size = object.size,
            "Multipart upload completed"
        );
        Ok(object)
    }

    fn abort_multipart(&self, upload: &MultipartUpload, opts: &Options) -> Result<()> {
        opts.check_cancelled()?;
        self.check_upload(upload)?;
        self.core()?.multipart.abort(&upload.upload_id)
    }
}
