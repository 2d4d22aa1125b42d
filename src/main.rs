use anyhow::Context;
use bucketsync::progress::Progress;
use bucketsync::{
    BatchCoordinator, CredentialSource, DestinationLayout, DownloadConfig, GcsClient, PathMode,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "bucketsync")]
#[command(about = "Download every object under Google Cloud Storage prefixes", long_about = None)]
#[command(version)]
struct Args {
    /// Source paths (e.g., gs://bucket_name/prefix)
    #[arg(required = true)]
    sources: Vec<String>,

    /// Local destination directory
    #[arg(short, long, default_value = "downloads")]
    destination: PathBuf,

    /// Credential file (service account key, authorized_user JSON or {"access_token": ...})
    #[arg(short = 'k', long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Maximum concurrent transfers per source path
    #[arg(short, long, default_value_t = 20)]
    workers: usize,

    /// Process several source paths at the same time
    #[arg(long)]
    concurrent_paths: bool,

    /// Source paths in flight at once with --concurrent-paths
    #[arg(long, default_value_t = 4)]
    max_concurrent_paths: usize,

    /// Recreate each key's full path below the prefix instead of keeping only its base name
    #[arg(long)]
    mirror_keys: bool,

    /// Storage API endpoint
    #[arg(long, default_value = bucketsync::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Write a JSON summary of the batch to this file
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long)]
    no_progress: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Log lines go through the progress display so they never tear a bar.
    let progress = Progress::new(!args.no_progress);

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("bucketsync={}", log_level))
        .with_writer(progress.log_writer())
        .init();

    let config = DownloadConfig {
        destination_root: args.destination,
        max_workers: args.workers,
        path_mode: if args.concurrent_paths {
            PathMode::Concurrent
        } else {
            PathMode::Sequential
        },
        max_concurrent_paths: args.max_concurrent_paths,
        layout: if args.mirror_keys {
            DestinationLayout::MirrorKeys
        } else {
            DestinationLayout::FlattenBaseName
        },
        show_progress: !args.no_progress,
    };
    config.validate()?;

    let credentials = CredentialSource::from_path(args.credentials);
    let client = GcsClient::connect(args.endpoint.clone(), &credentials)
        .await
        .with_context(|| format!("failed to set up storage client for {}", args.endpoint))?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining transfers");
            ctrl_c.cancel();
        }
    });

    let coordinator = BatchCoordinator::new(Arc::new(client), config)?
        .with_progress(progress)
        .with_cancellation(cancel);
    let report = coordinator.run_batch(&args.sources).await;
    report.log_summary();

    if let Some(path) = &args.summary_json {
        report
            .write_json(path)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
    }

    if report.is_success() {
        info!("✅ All sources downloaded successfully!");
    }
    std::process::exit(report.exit_code());
}
