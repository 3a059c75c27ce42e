//! Error types for rdu
//!
//! This module defines the error hierarchy for:
//! - Configuration and CLI validation
//! - Per-entry scan failures (logged and absorbed, never fatal)
//! - Worker thread failures
//! - Tree cache loading and saving
//!
//! Scan errors are values, not control flow: the scanner logs them, counts
//! them and moves on. Everything else propagates with `?` up to `main`.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for rdu
#[derive(Error, Debug)]
pub enum RduError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Root path could not be scanned at all
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Cache file errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// I/O errors (output, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid thread count {count}: must be between 1 and {max}")]
    InvalidThreadCount { count: usize, max: usize },

    /// Invalid block size
    #[error("Invalid block size {size}: must be greater than 0")]
    InvalidBlockSize { size: u64 },

    /// Summarize combined with a listing depth
    #[error("Cannot summarize and list entries down to depth {depth} at the same time")]
    SummarizeWithDepth { depth: usize },

    /// Cache options that cannot be combined
    #[error("Conflicting cache options: {reason}")]
    CacheConflict { reason: String },

    /// Cache output path error
    #[error("Invalid cache path '{path}': {reason}")]
    InvalidCachePath { path: PathBuf, reason: String },
}

/// Failure to read one filesystem entry
#[derive(Error, Debug)]
pub enum ScanError {
    /// Directory could not be opened
    #[error("cannot open directory '{path}': {source}")]
    OpenDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Directory entries could not be read
    #[error("cannot read directory '{path}': {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Entry could not be stat'ed
    #[error("cannot access '{path}': {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ScanError {
    /// Path the error refers to
    pub fn path(&self) -> &std::path::Path {
        match self {
            ScanError::OpenDir { path, .. }
            | ScanError::ReadDir { path, .. }
            | ScanError::Stat { path, .. } => path,
        }
    }

    /// Check if this is a permission problem
    pub fn is_permission_denied(&self) -> bool {
        match self {
            ScanError::OpenDir { source, .. }
            | ScanError::ReadDir { source, .. }
            | ScanError::Stat { source, .. } => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
        }
    }
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker thread could not be started
    #[error("Failed to spawn worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },
}

/// Tree cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O error reading or writing the cache file
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// File does not start with the cache magic
    #[error("'{path}' is not an rdu cache file")]
    BadMagic { path: PathBuf },

    /// Written by an incompatible format version
    #[error("Unsupported cache version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Record layout differs from this build
    #[error("Cache record size {found} does not match {expected}")]
    RecordSizeMismatch { found: u32, expected: u32 },

    /// File length disagrees with the header
    #[error("Cache is truncated or padded: expected {expected} bytes, found {found}")]
    LengthMismatch { expected: u64, found: u64 },

    /// Tree without nodes
    #[error("Cache contains no nodes")]
    Empty,

    /// A record refers to a slot outside the array
    #[error("Record {record} links to index {index}, but only {len} slots exist")]
    DanglingIndex { record: usize, index: u32, len: usize },

    /// Links that do not describe a tree
    #[error("Record {record} is inconsistent: {reason}")]
    Inconsistent { record: usize, reason: &'static str },

    /// Name does not fit in a fixed-size record
    #[error("Name '{name}' is {len} bytes, records hold at most {max}")]
    NameTooLong { name: String, len: usize, max: usize },

    /// Tree is too large for 32-bit record indices
    #[error("Tree has {count} nodes, more than a cache can index")]
    TooManyNodes { count: usize },
}

/// Result type alias for RduError
pub type Result<T> = std::result::Result<T, RduError>;

/// Result type alias for CacheError
pub type CacheResult<T> = std::result::Result<T, CacheError>;
