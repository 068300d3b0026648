//! Error types shared between the dockvol core and its transport front ends.
//!
//! Volume operations surface one error type, [`DockvolError`]. Variants fall
//! into two groups: typed conditions the dispatcher and backends make
//! decisions on (`InUse`, `Underflow`, `UnknownLabel`, ...) and broad
//! operational failures carrying a human-readable message (`Storage`,
//! `Config`, ...). The transport layer maps all of them to protocol-level
//! error strings via `Display`.

use std::io;
use thiserror::Error;

/// Result type alias used across the dockvol crates.
pub type DockvolResult<T> = Result<T, DockvolError>;

/// Errors returned by volume operations.
#[derive(Debug, Error)]
pub enum DockvolError {
    /// The remote storage control plane could not be reached or rejected
    /// the request. Surfaced verbatim, never retried by the core.
    #[error("storage control plane unavailable: {0}")]
    BackendUnavailable(String),

    /// Remove was requested for a volume that still has active mounts.
    #[error("volume {name} is still in use (active mounts: {count})")]
    InUse { name: String, count: u32 },

    /// A reference count was decremented below zero. Indicates a
    /// bookkeeping inconsistency; callers log it and continue cleanup.
    #[error("refcount underflow for volume {name}")]
    Underflow { name: String },

    /// No storage label could be resolved for the volume name.
    #[error("unknown storage label for {0}")]
    UnknownLabel(String),

    /// The resolved label is backed by a different filesystem type than
    /// the requested backend supports.
    #[error("label {label} is backed by filesystem type {fs_type}")]
    FilesystemMismatch { label: String, fs_type: String },

    /// No mkfs tool was found for the requested filesystem type.
    #[error("no mkfs found for {fs_type} (supported: {supported})")]
    UnsupportedFilesystem { fs_type: String, supported: String },

    /// The named volume does not exist.
    #[error("volume not found: {0}")]
    NotFound(String),

    /// Filesystem or device level operation failed.
    #[error("storage: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config: {0}")]
    Config(String),

    /// Internal invariant violation.
    #[error("internal: {0}")]
    Internal(String),

    /// Generic IO error (catch-all).
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl DockvolError {
    /// Create an in-use error.
    pub fn in_use(name: impl Into<String>, count: u32) -> Self {
        Self::InUse {
            name: name.into(),
            count,
        }
    }

    /// Create an underflow error.
    pub fn underflow(name: impl Into<String>) -> Self {
        Self::Underflow { name: name.into() }
    }

    /// Create a filesystem mismatch error.
    pub fn fs_mismatch(label: impl Into<String>, fs_type: impl Into<String>) -> Self {
        Self::FilesystemMismatch {
            label: label.into(),
            fs_type: fs_type.into(),
        }
    }
}
