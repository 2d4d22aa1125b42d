//! Data structures for bucket sync operations.

use crate::error::SyncError;
use serde::Serialize;
use std::path::PathBuf;

/// A parsed `gs://bucket[/prefix]` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Bucket name, never empty.
    pub bucket: String,
    /// Key prefix to list under, or `None` for the whole bucket.
    pub prefix: Option<String>,
}

/// A source location together with the local directory it is mirrored into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub location: SourceLocation,
    /// `destination_root/bucket/prefix`.
    pub destination_dir: PathBuf,
}

/// One object listed by the storage service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

impl ObjectEntry {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// A single object to fetch. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub bucket: String,
    pub object_key: String,
    pub destination_path: PathBuf,
}

/// A failed object transfer, kept in completion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferFailure {
    pub object_key: String,
    pub error_message: String,
}

/// Outcome of mirroring one source path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub total_tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes_downloaded: u64,
    pub elapsed_seconds: f64,
    pub failures: Vec<TransferFailure>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// How multiple source paths are scheduled relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathMode {
    /// One source path at a time.
    #[default]
    Sequential,
    /// Up to `max_concurrent_paths` source paths at once, each with its own pool.
    Concurrent,
}

/// How an object key maps onto a file below the destination directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationLayout {
    /// Only the key's base name is kept. Keys sharing a base name under
    /// different sub-prefixes overwrite each other.
    #[default]
    FlattenBaseName,
    /// The key's path relative to the listed prefix is recreated locally.
    MirrorKeys,
}

/// Configuration for a batch download.
///
/// # Example
///
/// ```
/// use bucketsync::{DownloadConfig, PathMode};
///
/// let config = DownloadConfig {
///     destination_root: "/data".into(),
///     max_workers: 32,
///     path_mode: PathMode::Concurrent,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Local directory that mirrors `bucket/prefix/...`.
    pub destination_root: PathBuf,
    /// Maximum number of concurrent fetches per source path (default: 20).
    ///
    /// Note: This is not limited by CPU cores. Transfers are I/O-bound,
    /// so the limiting factor is network bandwidth, not CPU.
    pub max_workers: usize,
    /// Sequential or concurrent scheduling of source paths.
    pub path_mode: PathMode,
    /// Source paths in flight at once in [`PathMode::Concurrent`] (default: 4).
    ///
    /// At most `max_concurrent_paths * max_workers` fetches run at the same time.
    pub max_concurrent_paths: usize,
    /// Local file layout for fetched objects.
    pub layout: DestinationLayout,
    /// Draw progress bars on stderr.
    pub show_progress: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            destination_root: PathBuf::from("downloads"),
            max_workers: 20,
            path_mode: PathMode::Sequential,
            max_concurrent_paths: 4,
            layout: DestinationLayout::FlattenBaseName,
            show_progress: false,
        }
    }
}

impl DownloadConfig {
    /// Rejects settings the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.max_workers == 0 {
            return Err(SyncError::Config("max_workers must be at least 1".into()));
        }
        if self.path_mode == PathMode::Concurrent && self.max_concurrent_paths == 0 {
            return Err(SyncError::Config(
                "max_concurrent_paths must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Upper bound on fetches in flight across all source paths.
    pub fn max_in_flight(&self) -> usize {
        match self.path_mode {
            PathMode::Sequential => self.max_workers,
            PathMode::Concurrent => self.max_workers * self.max_concurrent_paths,
        }
    }
}
