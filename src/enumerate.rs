//! Turns a prefix listing into per-object download tasks.

use crate::error::SyncError;
use crate::resolve::prefix_dir;
use crate::storage::StorageClient;
use crate::types::{DestinationLayout, DownloadTask, ObjectEntry, ResolvedSource};
use std::path::PathBuf;

/// Lists every object under the resolved prefix once and builds one task
/// per object.
///
/// An empty listing yields an empty task list. Any listing error is wrapped
/// in [`SyncError::ListingFailed`].
pub async fn enumerate_tasks(
    client: &dyn StorageClient,
    resolved: &ResolvedSource,
    layout: DestinationLayout,
) -> Result<Vec<DownloadTask>, SyncError> {
    let location = &resolved.location;
    let objects = client
        .list_objects(&location.bucket, location.prefix.as_deref())
        .await
        .map_err(|e| SyncError::ListingFailed {
            bucket: location.bucket.clone(),
            prefix: location.prefix.clone(),
            source: Box::new(e),
        })?;

    Ok(objects
        .iter()
        .map(|object| build_task(resolved, object, layout))
        .collect())
}

/// Builds the task for one listed object.
///
/// A key whose local name cannot be placed under the destination directory
/// still becomes a task; its `destination_path` is left empty so the worker
/// pool records it as a failed transfer instead of writing elsewhere.
/// `resolved` must have been resolved with the same `layout`.
pub fn build_task(
    resolved: &ResolvedSource,
    object: &ObjectEntry,
    layout: DestinationLayout,
) -> DownloadTask {
    let destination_path = relative_destination(&object.key, resolved.location.prefix.as_deref(), layout)
        .map(|relative| resolved.destination_dir.join(relative))
        .unwrap_or_default();

    DownloadTask {
        bucket: resolved.location.bucket.clone(),
        object_key: object.key.clone(),
        destination_path,
    }
}

/// Last `/`-delimited segment of a key.
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn relative_destination(
    key: &str,
    prefix: Option<&str>,
    layout: DestinationLayout,
) -> Option<PathBuf> {
    match layout {
        DestinationLayout::FlattenBaseName => {
            let name = base_name(key);
            is_safe_segment(name).then(|| PathBuf::from(name))
        }
        DestinationLayout::MirrorKeys => {
            // destination_dir mirrors the prefix up to its last separator.
            let relative = key.strip_prefix(prefix.map_or("", prefix_dir))?;

            let mut path = PathBuf::new();
            for segment in relative.split('/').filter(|s| !s.is_empty()) {
                if !is_safe_segment(segment) {
                    return None;
                }
                path.push(segment);
            }
            (!path.as_os_str().is_empty()).then_some(path)
        }
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains('\\')
}
