//! Configuration for segvault
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, VaultError};

/// Main configuration for a segvault store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all buckets
    /// Internal structure:
    ///   {data_dir}/
    ///     └── {bucket}/
    ///           ├── segments/      (append-only segment files)
    ///           ├── manifest.json  (index snapshot)
    ///           └── multipart/     (in-flight uploads)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Segment Configuration
    // -------------------------------------------------------------------------
    /// Number of write shards (independent segment chains) per bucket
    pub segment_shards: usize,

    /// Segment size that triggers rotation (bytes, 0 disables rotation)
    pub max_segment_size: u64,

    /// Durability strategy for appends
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Number of independently locked index partitions
    pub index_partitions: usize,

    /// Max number of path segments tracked by the prefix index
    pub prefix_depth: usize,

    // -------------------------------------------------------------------------
    // Manifest Configuration
    // -------------------------------------------------------------------------
    /// Minimum time between opportunistic manifest snapshots (zero disables them)
    pub manifest_interval: Duration,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Largest object kept in the small-object cache (bytes)
    pub small_object_max: u64,

    /// Total byte budget of the small-object cache (0 disables the cache)
    pub small_cache_capacity: u64,
}

/// Segment sync strategy
///
/// This is the only durability/performance knob of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append, rotation and manifest write (safest, slowest)
    EveryWrite,

    /// Never fsync. A process crash (not a clean close) can lose the tail of
    /// unflushed writes; reads while the process is alive are always correct.
    Never,
}

impl SyncStrategy {
    pub fn should_sync(self) -> bool {
        matches!(self, SyncStrategy::EveryWrite)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./segvault_data"),
            segment_shards: 4,
            max_segment_size: 64 * 1024 * 1024, // 64 MB
            sync_strategy: SyncStrategy::EveryWrite,
            index_partitions: 256,
            prefix_depth: 2,
            manifest_interval: Duration::from_secs(5),
            small_object_max: 64 * 1024,            // 64 KB
            small_cache_capacity: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.segment_shards == 0 {
            return Err(VaultError::Config("segment_shards must be at least 1".to_string()));
        }
        if self.index_partitions == 0 {
            return Err(VaultError::Config(
                "index_partitions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all buckets)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the number of write shards per bucket
    pub fn segment_shards(mut self, shards: usize) -> Self {
        self.config.segment_shards = shards;
        self
    }

    /// Set the segment rotation threshold (in bytes)
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.config.max_segment_size = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Shorthand for `SyncStrategy::Never`
    pub fn no_fsync(mut self, no_fsync: bool) -> Self {
        self.config.sync_strategy = if no_fsync {
            SyncStrategy::Never
        } else {
            SyncStrategy::EveryWrite
        };
        self
    }

    /// Set the number of index partitions
    pub fn index_partitions(mut self, partitions: usize) -> Self {
        self.config.index_partitions = partitions;
        self
    }

    /// Set the prefix index depth
    pub fn prefix_depth(mut self, depth: usize) -> Self {
        self.config.prefix_depth = depth;
        self
    }

    /// Set the manifest snapshot interval
    pub fn manifest_interval(mut self, interval: Duration) -> Self {
        self.config.manifest_interval = interval;
        self
    }

    /// Set the small-object cache item ceiling (in bytes)
    pub fn small_object_max(mut self, size: u64) -> Self {
        self.config.small_object_max = size;
        self
    }

    /// Set the small-object cache total budget (in bytes)
    pub fn small_cache_capacity(mut self, size: u64) -> Self {
        self.config.small_cache_capacity = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
