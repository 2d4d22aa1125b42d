//! bucketsync - Mirror Google Cloud Storage prefixes to a local directory tree
//!
//! This library lists every object under one or more `gs://bucket/prefix`
//! locations and fetches them in parallel into
//! `destination_root/bucket/prefix/`, recording per-object failures instead of
//! aborting the batch.
//!
//! # Features
//!
//! - **Bounded Parallelism**: At most `max_workers` fetches in flight per source path
//! - **Failure Isolation**: A failed object never stops its siblings or other paths
//! - **Sequential or Concurrent Paths**: Run source paths one by one or several at once
//! - **Progress Tracking**: Per-path progress bars and a final summary
//! - **Explicit Credentials**: Credential files are passed in, never injected into the environment
//!
//! Files are overwritten on every run. Failed transfers are not retried and may
//! leave a partial file at their destination.
//!
//! # Example
//!
//! ```no_run
//! use bucketsync::{BatchCoordinator, CredentialSource, DownloadConfig, GcsClient};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GcsClient::connect(bucketsync::DEFAULT_ENDPOINT, &CredentialSource::Ambient).await?;
//! let config = DownloadConfig {
//!     destination_root: "/data".into(),
//!     ..Default::default()
//! };
//!
//! let coordinator = BatchCoordinator::new(Arc::new(client), config)?;
//! let report = coordinator
//!     .run_batch(&["gs://my-bucket/logs/2024".to_string()])
//!     .await;
//! report.log_summary();
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod coordinator;
pub mod enumerate;
pub mod error;
pub mod gcs;
pub mod pool;
pub mod progress;
pub mod report;
pub mod resolve;
pub mod storage;
pub mod types;

pub use auth::CredentialSource;
pub use coordinator::BatchCoordinator;
pub use error::SyncError;
pub use gcs::{GcsClient, DEFAULT_ENDPOINT};
pub use pool::{PoolOutcome, TransferWorkerPool};
pub use report::{BatchReport, PathReport};
pub use storage::StorageClient;
pub use types::{
    BatchResult, DestinationLayout, DownloadConfig, DownloadTask, ObjectEntry, PathMode,
    ResolvedSource, SourceLocation, TransferFailure,
};
