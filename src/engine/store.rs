//! Log-structured store
//!
//! Maps bucket names to directories under the data root and hands out one
//! shared [`LogBucket`] per name.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::bucket::{LogBucket, FEATURES};
use crate::cache::SmallObjectCache;
use crate::config::Config;
use crate::error::{io_context, Result, VaultError};
use crate::key::safe_bucket_name;
use crate::manifest::SEGMENT_DIR;
use crate::storage::{Bucket, BucketInfo, Features, Options, Storage};

/// State shared between the store and its bucket handles
pub(crate) struct StoreShared {
    config: Arc<Config>,
    cache: Arc<SmallObjectCache>,
    buckets: Mutex<HashMap<String, Arc<LogBucket>>>,
    closed: AtomicBool,
}

impl StoreShared {
    /// The single handle for `name`, created on first request
    pub(crate) fn handle(self: &Arc<Self>, name: &str) -> Arc<LogBucket> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(name.to_string()).or_insert_with(|| {
            Arc::new(LogBucket::new(
                name,
                self.config.data_dir.join(name),
                Arc::clone(&self.config),
                Arc::clone(&self.cache),
                Arc::downgrade(self),
            ))
        });
        Arc::clone(bucket)
    }

    fn bucket_dir(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// =============================================================================
// Log Store
// =============================================================================

/// Embedded object store rooted at [`Config::data_dir`]
pub struct LogStore {
    shared: Arc<StoreShared>,
}

impl LogStore {
    /// Open (or create) a store. Buckets are loaded lazily.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)
            .map_err(io_context(format!("create {}", config.data_dir.display())))?;

        info!(
            data_dir = %config.data_dir.display(),
            shards = config.segment_shards,
            sync = ?config.sync_strategy,
            "Store opened"
        );

        let cache = Arc::new(SmallObjectCache::new(
            config.small_object_max,
            config.small_cache_capacity,
        ));
        Ok(Self {
            shared: Arc::new(StoreShared {
                config: Arc::new(config),
                cache,
                buckets: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Concrete handle for `name` (with the inspection helpers)
    pub fn log_bucket(&self, name: &str) -> Arc<LogBucket> {
        self.shared.handle(&safe_bucket_name(name))
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn cache(&self) -> &SmallObjectCache {
        &self.shared.cache
    }

    fn check_open(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(VaultError::Closed);
        }
        Ok(())
    }
}

impl Storage for LogStore {
    fn bucket(&self, name: &str) -> Arc<dyn Bucket> {
        self.log_bucket(name)
    }

    fn create_bucket(&self, name: &str, opts: &Options) -> Result<BucketInfo> {
        opts.check_cancelled()?;
        self.check_open()?;
        let name = safe_bucket_name(name);
        let dir = self.shared.bucket_dir(&name);

        if let Err(e) = fs::create_dir(&dir) {
            return Err(match e.kind() {
                io::ErrorKind::AlreadyExists => VaultError::Exist,
                _ => io_context(format!("create bucket {}", name))(e),
            });
        }
        let seg_dir = dir.join(SEGMENT_DIR);
        fs::create_dir_all(&seg_dir).map_err(io_context(format!("create {}", seg_dir.display())))?;

        info!(bucket = %name, "Bucket created");
        self.log_bucket(&name).info(opts)
    }

    fn delete_bucket(&self, name: &str, opts: &Options) -> Result<()> {
        opts.check_cancelled()?;
        self.check_open()?;
        let name = safe_bucket_name(name);
        let dir = self.shared.bucket_dir(&name);
        if !dir.is_dir() {
            return Err(VaultError::NotExist);
        }

        let bucket = self.log_bucket(&name);
        let core = bucket.core()?;
        let non_empty = !core.index.is_empty() || !core.multipart.is_empty();
        if non_empty && !opts.recursive.unwrap_or(false) {
            return Err(VaultError::Permission(format!("bucket {} is not empty", name)));
        }

        bucket.mark_deleted();
        core.discard();
        self.shared.buckets.lock().remove(&name);
        self.shared.cache.remove_bucket(&name);
        fs::remove_dir_all(&dir).map_err(io_context(format!("remove bucket {}", name)))?;

        info!(bucket = %name, objects = core.index.len(), "Bucket deleted");
        Ok(())
    }

    fn list_buckets(&self, opts: &Options) -> Result<Vec<BucketInfo>> {
        opts.check_cancelled()?;
        self.check_open()?;
        let root = &self.shared.config.data_dir;
        let entries = fs::read_dir(root).map_err(io_context(format!("read {}", root.display())))?;

        let mut buckets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_context(format!("read {}", root.display())))?;
            let meta = entry
                .metadata()
                .map_err(io_context(format!("stat {}", entry.path().display())))?;
            if !meta.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(UNIX_EPOCH);
            buckets.push(BucketInfo { name, created });
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    fn features(&self) -> Features {
        FEATURES
    }

    fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let buckets: Vec<_> = self.shared.buckets.lock().values().cloned().collect();
        let mut first_error = None;
        for bucket in buckets {
            let Some(core) = bucket.loaded_core() else {
                continue;
            };
            if let Err(e) = core.close() {
                warn!(bucket = %bucket.name(), error = %e, "Bucket close failed");
                first_error.get_or_insert(e);
            } else {
                debug!(bucket = %bucket.name(), "Bucket closed");
            }
        }

        info!(data_dir = %self.shared.config.data_dir.display(), "Store closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        if !self.shared.is_closed() {
            if let Err(e) = Storage::close(self) {
                warn!(error = %e, "Store close on drop failed");
            }
        }
    }
}
