//! # segvault
//!
//! An embedded, crash-recoverable object store with:
//! - Buckets of slash-separated keys stored in append-only segment logs
//! - Sharded writers so unrelated keys append in parallel
//! - Manifest snapshots plus tail replay for fast, torn-write-safe recovery
//! - Prefix listing, server-side copy/move and multipart uploads
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Storage / Bucket traits                      │
//! │        (write, open, stat, delete, copy, move, list)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                LogStore → LogBucket (lazy load)              │
//! └──────┬──────────────┬───────────────┬──────────────┬────────┘
//!        │              │               │              │
//!        ▼              ▼               ▼              ▼
//! ┌────────────┐ ┌─────────────┐ ┌────────────┐ ┌─────────────┐
//! │  Segments  │ │  KeyIndex   │ │  Manifest  │ │  Multipart  │
//! │ (N shards) │ │ (sharded +  │ │ (snapshot  │ │  (staged    │
//! │  append    │ │   prefix)   │ │  + tails)  │ │   parts)    │
//! └─────┬──────┘ └─────────────┘ └────────────┘ └─────────────┘
//!       │
//!       ▼
//! ┌────────────┐     ┌──────────────────┐
//! │   Record   │     │ SmallObjectCache │
//! │  (codec)   │     │  (stamped LRU)   │
//! └────────────┘     └──────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod key;
pub mod record;
pub mod segment;
pub mod index;
pub mod cache;
pub mod manifest;
pub mod multipart;
pub mod storage;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorKind, Result, VaultError};
pub use config::{Config, ConfigBuilder, SyncStrategy};
pub use engine::{LogBucket, LogStore};
pub use storage::{
    Bucket, BucketInfo, CancelToken, Features, MultipartBucket, MultipartUpload, Object,
    ObjectIter, ObjectReader, Options, PartInfo, Storage,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of segvault
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
