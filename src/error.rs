//! Error types for segvault
//!
//! Provides a unified error type for all operations, plus a coarse
//! [`ErrorKind`] that callers at the storage boundary match on.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias using VaultError
pub type Result<T> = std::result::Result<T, VaultError>;

/// Unified error type for segvault operations
#[derive(Debug, Error)]
pub enum VaultError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // -------------------------------------------------------------------------
    // Boundary Errors (surfaced to storage callers)
    // -------------------------------------------------------------------------
    #[error("object or bucket does not exist")]
    NotExist,

    #[error("object or bucket already exists")]
    Exist,

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("store is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Log Errors (only surface through bucket load)
    // -------------------------------------------------------------------------
    #[error("corrupt record in segment {segment} at offset {offset}: {reason}")]
    CorruptRecord {
        segment: String,
        offset: u64,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Manifest / Serialization Errors
    // -------------------------------------------------------------------------
    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    /// A failure shared by every caller of a run-once operation (bucket load).
    #[error(transparent)]
    Shared(Arc<VaultError>),
}

/// Coarse classification of a [`VaultError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotExist,
    Exist,
    Permission,
    Unsupported,
    InvalidInput,
    Corrupt,
    Io,
    Cancelled,
    Other,
}

impl VaultError {
    /// Classify this error, looking through shared load failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::NotExist => ErrorKind::NotExist,
            VaultError::Exist => ErrorKind::Exist,
            VaultError::Permission(_) => ErrorKind::Permission,
            VaultError::Unsupported(_) => ErrorKind::Unsupported,
            VaultError::InvalidKey(_) | VaultError::InvalidInput(_) => ErrorKind::InvalidInput,
            VaultError::CorruptRecord { .. } => ErrorKind::Corrupt,
            VaultError::Cancelled => ErrorKind::Cancelled,
            VaultError::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorKind::NotExist,
            VaultError::Io(_) => ErrorKind::Io,
            VaultError::Shared(inner) => inner.kind(),
            VaultError::Manifest(_)
            | VaultError::Serialization(_)
            | VaultError::Config(_)
            | VaultError::Closed => ErrorKind::Other,
        }
    }

    pub fn is_not_exist(&self) -> bool {
        self.kind() == ErrorKind::NotExist
    }

    pub fn is_permission(&self) -> bool {
        self.kind() == ErrorKind::Permission
    }

    pub fn is_corrupt(&self) -> bool {
        self.kind() == ErrorKind::Corrupt
    }

    pub(crate) fn corrupt(
        segment: impl Into<String>,
        offset: u64,
        reason: impl Into<String>,
    ) -> Self {
        VaultError::CorruptRecord {
            segment: segment.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// Attach the segment and offset to a corruption raised by the codec.
    pub(crate) fn located(self, segment: &str, at: u64) -> Self {
        match self {
            VaultError::CorruptRecord { reason, .. } => VaultError::CorruptRecord {
                segment: segment.to_string(),
                offset: at,
                reason,
            },
            other => other,
        }
    }
}

/// Wrap an I/O error with operation context, keeping its `io::ErrorKind`.
pub(crate) fn io_context(context: impl std::fmt::Display) -> impl FnOnce(io::Error) -> VaultError {
    move |e| VaultError::Io(io::Error::new(e.kind(), format!("{}: {}", context, e)))
}
