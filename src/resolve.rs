//! Source path parsing and destination directory layout.

use crate::error::SyncError;
use crate::types::{DestinationLayout, ResolvedSource, SourceLocation};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Scheme marker every source path must start with.
pub const SCHEME: &str = "gs://";

/// Parses `gs://bucket[/prefix]` into its bucket and optional prefix.
///
/// The prefix is kept exactly as written (a trailing `/` still narrows the
/// listing to that "directory"), except that leading separators are dropped.
/// An empty remainder means the whole bucket.
pub fn parse_source(source: &str) -> Result<SourceLocation, SyncError> {
    let rest = source
        .strip_prefix(SCHEME)
        .ok_or_else(|| SyncError::invalid_source(source, format!("must start with {}", SCHEME)))?;

    let (bucket, prefix) = match rest.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix.trim_start_matches('/')),
        None => (rest, ""),
    };

    if bucket.is_empty() {
        return Err(SyncError::invalid_source(source, "bucket name is empty"));
    }
    if prefix.split('/').any(|segment| segment == "..") {
        return Err(SyncError::invalid_source(
            source,
            "prefix must not contain '..' segments",
        ));
    }

    Ok(SourceLocation {
        bucket: bucket.to_string(),
        prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
    })
}

/// Computes the local directory a location is downloaded into.
///
/// For [`DestinationLayout::FlattenBaseName`] this is
/// `destination_root/bucket/prefix`. Mirrored keys are placed relative to the
/// prefix's directory part, so for [`DestinationLayout::MirrorKeys`] a
/// trailing partial segment (`20` in `logs/20`) is left out.
pub fn destination_dir(
    destination_root: &Path,
    location: &SourceLocation,
    layout: DestinationLayout,
) -> PathBuf {
    let prefix = location.prefix.as_deref().unwrap_or("");
    let prefix = match layout {
        DestinationLayout::FlattenBaseName => prefix,
        DestinationLayout::MirrorKeys => prefix_dir(prefix),
    };

    let mut dir = destination_root.join(&location.bucket);
    for segment in prefix.split('/').filter(|s| !s.is_empty() && *s != ".") {
        dir.push(segment);
    }
    dir
}

/// The part of a prefix up to and including its last `/`, or `""` when it
/// has none.
pub fn prefix_dir(prefix: &str) -> &str {
    prefix.rfind('/').map_or("", |i| &prefix[..=i])
}

/// Parses a source path and computes where it is mirrored, without touching
/// the filesystem.
pub fn resolve_source(
    source: &str,
    destination_root: &Path,
    layout: DestinationLayout,
) -> Result<ResolvedSource, SyncError> {
    let location = parse_source(source)?;
    let destination_dir = destination_dir(destination_root, &location, layout);
    Ok(ResolvedSource {
        location,
        destination_dir,
    })
}

/// Resolves a source path and creates its destination directory.
///
/// Creation is idempotent: an existing directory, including one created
/// concurrently by another worker, is not an error.
pub async fn resolve(
    source: &str,
    destination_root: &Path,
    layout: DestinationLayout,
) -> Result<ResolvedSource, SyncError> {
    let resolved = resolve_source(source, destination_root, layout)?;
    ensure_dir(&resolved.destination_dir).await?;
    debug!(
        "Resolved {} to {}",
        source,
        resolved.destination_dir.display()
    );
    Ok(resolved)
}

pub(crate) async fn ensure_dir(path: &Path) -> Result<(), SyncError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| SyncError::DirectoryCreationFailed {
            path: path.to_path_buf(),
            source,
        })
}
