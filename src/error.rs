//! Error types for bucket sync operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while mirroring a bucket prefix.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The source location string is not a `gs://bucket[/prefix]` path.
    #[error("Invalid source path '{path}': {reason}")]
    InvalidSourcePath {
        /// The string as supplied by the caller.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Objects under a prefix could not be listed.
    #[error("Listing gs://{bucket}/{} failed: {source}", prefix.as_deref().unwrap_or(""))]
    ListingFailed {
        bucket: String,
        prefix: Option<String>,
        #[source]
        source: Box<SyncError>,
    },

    /// A single object could not be fetched to its destination file.
    #[error("Transfer of '{key}' failed: {source}")]
    TransferFailed {
        key: String,
        #[source]
        source: Box<SyncError>,
    },

    /// The local destination directory could not be created.
    #[error("Could not create directory {}: {source}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The storage service answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Credentials could not be loaded or exchanged for a token.
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Invalid download configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation was cancelled before it completed.
    #[error("Cancelled")]
    Cancelled,

    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP request error.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

impl SyncError {
    pub(crate) fn invalid_source(path: &str, reason: impl Into<String>) -> Self {
        SyncError::InvalidSourcePath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transfer(key: &str, source: SyncError) -> Self {
        SyncError::TransferFailed {
            key: key.to_string(),
            source: Box::new(source),
        }
    }
}
