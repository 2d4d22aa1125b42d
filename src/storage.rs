//! Storage service abstraction used by the enumerator and the worker pool.

use crate::error::SyncError;
use crate::types::ObjectEntry;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Object storage operations needed to mirror a prefix.
///
/// A single instance is shared by every worker of every pool, so
/// implementations must be safe for concurrent use.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Lists every object whose key starts with `prefix` (the whole bucket
    /// when `prefix` is `None`), following pagination to the end.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectEntry>, SyncError>;

    /// Fetches one object into `destination`, replacing any existing file.
    ///
    /// Returns the number of bytes written. A failed fetch may leave a
    /// partial file behind.
    async fn fetch_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, SyncError>;
}
