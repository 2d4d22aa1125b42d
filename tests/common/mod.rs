//! Shared fixtures for batch tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bucketsync::{ObjectEntry, StorageClient, SyncError};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory object store with failure injection and an in-flight gauge.
#[derive(Default)]
pub struct MemoryStorage {
    objects: BTreeMap<(String, String), Vec<u8>>,
    failing_buckets: HashSet<String>,
    failing_keys: HashSet<String>,
    fetch_delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    list_calls: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

/// Decrements the in-flight gauge when a fetch ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, bucket: &str, key: &str, body: &[u8]) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), body.to_vec());
        self
    }

    pub fn with_objects(mut self, bucket: &str, keys: &[String]) -> Self {
        for key in keys {
            self = self.with_object(bucket, key, key.as_bytes());
        }
        self
    }

    pub fn failing_listing(mut self, bucket: &str) -> Self {
        self.failing_buckets.insert(bucket.to_string());
        self
    }

    pub fn failing_fetch(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectEntry>, SyncError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_buckets.contains(bucket) {
            return Err(SyncError::Http {
                status: 503,
                url: format!("memory://{}", bucket),
            });
        }

        Ok(self
            .objects
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix.unwrap_or("")))
            .map(|((_, key), body)| ObjectEntry::new(key.clone(), body.len() as u64))
            .collect())
    }

    async fn fetch_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, SyncError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.fetch_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(self.fetch_delay) => {}
            }
        }

        if self.failing_keys.contains(key) {
            // Leaves an empty file behind, like an interrupted transfer.
            tokio::fs::write(destination, b"").await?;
            return Err(SyncError::Http {
                status: 500,
                url: format!("memory://{}/{}", bucket, key),
            });
        }

        let body = self
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| SyncError::Http {
                status: 404,
                url: format!("memory://{}/{}", bucket, key),
            })?;
        tokio::fs::write(destination, body).await?;
        self.fetched.lock().unwrap().push(key.to_string());
        Ok(body.len() as u64)
    }
}

/// Every regular file below `root`, relative to it.
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<PathBuf>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, out);
            } else {
                out.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }

    let mut out = Vec::new();
    if root.exists() {
        walk(root, root, &mut out);
    }
    out.sort();
    out
}

pub fn keys(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}/file-{:03}.bin", prefix, i)).collect()
}
