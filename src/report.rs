//! Batch summaries for logging and machine-readable output.

use crate::error::SyncError;
use crate::types::{BatchResult, TransferFailure};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

/// Result of one source path: its counts, or the error that stopped it.
#[derive(Debug)]
pub struct PathReport {
    pub source: String,
    pub outcome: Result<BatchResult, SyncError>,
}

/// Per-path results of a batch, in the order the paths were given.
#[derive(Debug)]
pub struct BatchReport {
    pub paths: Vec<PathReport>,
    pub elapsed_seconds: f64,
}

#[derive(Serialize)]
struct PathSummary<'a> {
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a BatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct BatchSummary<'a> {
    total_tasks: usize,
    succeeded: usize,
    failed: usize,
    failed_paths: usize,
    elapsed_seconds: f64,
    paths: Vec<PathSummary<'a>>,
}

impl BatchReport {
    /// Looks up the report for a source path.
    pub fn get(&self, source: &str) -> Option<&PathReport> {
        self.paths.iter().find(|p| p.source == source)
    }

    fn results(&self) -> impl Iterator<Item = &BatchResult> {
        self.paths.iter().filter_map(|p| p.outcome.as_ref().ok())
    }

    pub fn total_tasks(&self) -> usize {
        self.results().map(|r| r.total_tasks).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.results().map(|r| r.succeeded).sum()
    }

    /// Objects that failed across all paths.
    pub fn failed(&self) -> usize {
        self.results().map(|r| r.failed).sum()
    }

    /// Paths that could not be processed at all.
    pub fn failed_paths(&self) -> usize {
        self.paths.iter().filter(|p| p.outcome.is_err()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &TransferFailure)> {
        self.paths.iter().flat_map(|p| {
            p.outcome
                .as_ref()
                .map(|r| r.failures.as_slice())
                .unwrap_or_default()
                .iter()
                .map(move |f| (p.source.as_str(), f))
        })
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.failed_paths() == 0
    }

    /// 0 when every object of every path was fetched, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Logs per-path counts, every failed object, and overall totals.
    pub fn log_summary(&self) {
        for path in &self.paths {
            match &path.outcome {
                Ok(result) => info!(
                    "{}: {} attempted, {} succeeded, {} failed in {}",
                    path.source,
                    result.total_tasks,
                    result.succeeded,
                    result.failed,
                    format_seconds(result.elapsed_seconds)
                ),
                Err(e) => error!("{}: not processed: {}", path.source, e),
            }
        }

        for (source, failure) in self.failures() {
            warn!(
                "Failed: {} ({}): {}",
                failure.object_key, source, failure.error_message
            );
        }

        info!(
            "Completed {} source path(s) in {}: {} attempted, {} succeeded, {} failed, {} path(s) not processed",
            self.paths.len(),
            format_seconds(self.elapsed_seconds),
            self.total_tasks(),
            self.succeeded(),
            self.failed(),
            self.failed_paths()
        );
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        let summary = BatchSummary {
            total_tasks: self.total_tasks(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            failed_paths: self.failed_paths(),
            elapsed_seconds: self.elapsed_seconds,
            paths: self
                .paths
                .iter()
                .map(|p| PathSummary {
                    source: &p.source,
                    result: p.outcome.as_ref().ok(),
                    error: p.outcome.as_ref().err().map(|e| e.to_string()),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&summary)?)
    }

    /// Persists the JSON summary to `path`.
    pub fn write_json(&self, path: &Path) -> Result<(), SyncError> {
        std::fs::write(path, self.to_json()?)?;
        info!("Persisted summary to {}", path.display());
        Ok(())
    }
}

fn format_seconds(seconds: f64) -> humantime::FormattedDuration {
    // Millisecond precision is plenty for a summary line.
    let millis = (seconds * 1000.0).round().max(0.0) as u64;
    humantime::format_duration(Duration::from_millis(millis))
}
