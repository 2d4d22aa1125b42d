//! Drives source paths through resolution, enumeration and the worker pool.

use crate::enumerate::enumerate_tasks;
use crate::error::SyncError;
use crate::pool::TransferWorkerPool;
use crate::progress::Progress;
use crate::report::{BatchReport, PathReport};
use crate::resolve::resolve;
use crate::storage::StorageClient;
use crate::types::{BatchResult, DownloadConfig, PathMode};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Mirrors one or many source paths with a shared storage client.
///
/// # Example
///
/// ```no_run
/// use bucketsync::{BatchCoordinator, CredentialSource, DownloadConfig, GcsClient};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = GcsClient::connect(bucketsync::DEFAULT_ENDPOINT, &CredentialSource::Ambient).await?;
/// let coordinator = BatchCoordinator::new(Arc::new(client), DownloadConfig::default())?;
/// let report = coordinator
///     .run_batch(&["gs://my-bucket/logs/2024".to_string()])
///     .await;
/// std::process::exit(report.exit_code());
/// # }
/// ```
pub struct BatchCoordinator {
    client: Arc<dyn StorageClient>,
    config: DownloadConfig,
    progress: Progress,
    cancel: CancellationToken,
}

impl BatchCoordinator {
    pub fn new(client: Arc<dyn StorageClient>, config: DownloadConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let progress = Progress::new(config.show_progress);
        Ok(Self {
            client,
            config,
            progress,
            cancel: CancellationToken::new(),
        })
    }

    /// Cancelling `cancel` stops the remaining work of every path.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Draws path bars on `progress` instead of a display of its own, so the
    /// caller can route log output around the same bars.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Runs every source path and reports each one in input order.
    ///
    /// A path-level failure is recorded for that path only; the remaining
    /// paths still run.
    pub async fn run_batch(&self, sources: &[String]) -> BatchReport {
        let start = Instant::now();
        info!(
            "Mirroring {} source path(s) into {} ({:?} mode, at most {} transfers in flight)",
            sources.len(),
            self.config.destination_root.display(),
            self.config.path_mode,
            self.config.max_in_flight()
        );

        let paths: Vec<PathReport> = match self.config.path_mode {
            PathMode::Sequential => {
                let mut paths = Vec::with_capacity(sources.len());
                for source in sources {
                    paths.push(self.run_reported(source).await);
                }
                paths
            }
            PathMode::Concurrent => {
                stream::iter(sources)
                    .map(|source| self.run_reported(source))
                    .buffered(self.config.max_concurrent_paths)
                    .collect()
                    .await
            }
        };

        BatchReport {
            paths,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        }
    }

    async fn run_reported(&self, source: &str) -> PathReport {
        let outcome = self.run_path(source).await;
        if let Err(e) = &outcome {
            error!("Skipping {}: {}", source, e);
        }
        PathReport {
            source: source.to_string(),
            outcome,
        }
    }

    /// Resolves, enumerates and downloads a single source path.
    pub async fn run_path(&self, source: &str) -> Result<BatchResult, SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let start = Instant::now();

        let resolved = resolve(source, &self.config.destination_root, self.config.layout).await?;
        let tasks = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            tasks = enumerate_tasks(self.client.as_ref(), &resolved, self.config.layout) => tasks?,
        };
        let total_tasks = tasks.len();
        info!("Started downloading {} files from {}", total_tasks, source);

        let pb = self.progress.path_bar(source, total_tasks);
        let outcome = TransferWorkerPool::new(Arc::clone(&self.client), self.config.max_workers)
            .with_cancellation(self.cancel.child_token())
            .run(tasks, &pb)
            .await;
        pb.finish_with_message(format!("{} ({} failed)", source, outcome.failed));

        let elapsed = start.elapsed();
        info!(
            "Downloaded {}/{} files from {} in {:.2} seconds",
            outcome.succeeded,
            total_tasks,
            source,
            elapsed.as_secs_f64()
        );

        Ok(BatchResult {
            total_tasks,
            succeeded: outcome.succeeded,
            failed: outcome.failed,
            bytes_downloaded: outcome.bytes_downloaded,
            elapsed_seconds: elapsed.as_secs_f64(),
            failures: outcome.failures,
        })
    }
}
