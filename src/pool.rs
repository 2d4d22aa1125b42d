//! Bounded-parallelism execution of download tasks.

use crate::error::SyncError;
use crate::resolve::ensure_dir;
use crate::storage::StorageClient;
use crate::types::{DownloadTask, TransferFailure};
use futures_util::stream::{FuturesUnordered, StreamExt};
use indicatif::ProgressBar;
use std::io;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Counts and failures from one pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub bytes_downloaded: u64,
    /// Failed objects in completion order.
    pub failures: Vec<TransferFailure>,
}

/// Runs download tasks with at most `max_workers` fetches in flight.
///
/// A failed task is recorded and never stops its siblings. There is no
/// retry and no cleanup of partially written files.
pub struct TransferWorkerPool {
    client: Arc<dyn StorageClient>,
    max_workers: usize,
    cancel: CancellationToken,
}

impl TransferWorkerPool {
    pub fn new(client: Arc<dyn StorageClient>, max_workers: usize) -> Self {
        Self {
            client,
            max_workers: max_workers.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops starting new tasks, and interrupts running fetches, once
    /// `cancel` fires. Interrupted tasks are reported as failures.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs every task to success or recorded failure before returning.
    pub async fn run(&self, tasks: Vec<DownloadTask>, pb: &ProgressBar) -> PoolOutcome {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut in_flight = FuturesUnordered::new();

        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            let client = Arc::clone(&self.client);
            let cancel = self.cancel.clone();
            let key = task.object_key.clone();

            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    permit = semaphore.acquire_owned() => permit.map_err(|_| SyncError::Cancelled)?,
                };
                transfer(client.as_ref(), &task, &cancel).await
            });

            in_flight.push(async move { (key, handle.await) });
        }

        let mut outcome = PoolOutcome::default();
        while let Some((key, joined)) = in_flight.next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(SyncError::IoError(io::Error::other(format!(
                    "worker task failed: {}",
                    e
                ))))
            });

            match result {
                Ok(bytes) => {
                    debug!("Fetched {} ({} bytes)", key, bytes);
                    outcome.succeeded += 1;
                    outcome.bytes_downloaded += bytes;
                }
                Err(e) => {
                    let error_message = e.to_string();
                    warn!("{}", SyncError::transfer(&key, e));
                    outcome.failed += 1;
                    outcome.failures.push(TransferFailure {
                        object_key: key,
                        error_message,
                    });
                }
            }
            pb.inc(1);
        }

        outcome
    }
}

async fn transfer(
    client: &dyn StorageClient,
    task: &DownloadTask,
    cancel: &CancellationToken,
) -> Result<u64, SyncError> {
    if task.destination_path.as_os_str().is_empty() {
        return Err(SyncError::IoError(io::Error::new(
            io::ErrorKind::InvalidInput,
            "object key has no safe local file name",
        )));
    }

    // Sibling tasks may race to create the same directory.
    if let Some(parent) = task.destination_path.parent() {
        ensure_dir(parent).await?;
    }

    client
        .fetch_object(&task.bucket, &task.object_key, &task.destination_path, cancel)
        .await
}
