//! # tree-sync
//!
//! Resumable, incremental synchronization of remote file trees with recursive
//! archive unpacking.
//!
//! ## Design Philosophy
//!
//! - **Resumable** - every file is flagged `CANCELLED` before work starts and
//!   only a confirmed success clears the flag, so an interrupted run picks up
//!   where it stopped
//! - **Incremental** - files whose remote hash is unchanged and whose last run
//!   succeeded are skipped
//! - **Bounded** - one download pool per remote, plus extraction and deletion
//!   pools, each with a configurable size
//! - **Library-first** - the transport and the archive tool are traits; the
//!   crate ships `rclone` / `7z` implementations and in-process ones
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use tree_sync::{Config, Pipeline, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::from_json_file(Path::new("config.json"))?;
//!     config.resolve_paths(Path::new("."));
//!
//!     let pipeline = Pipeline::from_config(config)?;
//!     let summary = run_with_shutdown(pipeline).await?;
//!     println!("{}/{} files processed", summary.processed, summary.total);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Archive probing and extraction
pub mod extraction;
/// Identity ownership registry
pub mod identity;
/// Durable per-file metadata
pub mod metadata;
/// Synchronization pipeline
pub mod pipeline;
/// Worker pools and task tracking
pub mod processes;
/// Progress bookkeeping
pub mod progress;
/// Remote file transports
pub mod transport;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{Config, RemoteConfig, SettingsConfig, SourceConfig, ToolsConfig};
pub use error::{
    Error, ExtractError, IdentityError, MetadataError, ProgressError, Result, TaskError,
    TransferError,
};
pub use extraction::{ArchiveTool, NativeArchiveTool, SevenZipCli};
pub use identity::IdentityRegistry;
pub use metadata::{MetadataRecord, MetadataStore};
pub use pipeline::Pipeline;
pub use processes::ProcessManager;
pub use progress::ProgressCounter;
pub use transport::{LocalDirectoryTransport, RcloneTransport, RemoteTransport};
pub use types::{
    ErrorFlag, FileKind, Identity, PoolKind, ProcessResult, RemoteFile, ResultStatus, RunSummary,
    TaskId,
};

/// Helper function to run a pipeline with graceful signal handling.
///
/// The first termination signal cancels the pipeline's shutdown handle; the
/// run then finishes its shutdown sequence and returns its summary.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use tree_sync::{Config, Pipeline, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let pipeline = Pipeline::from_config(config)?;
///
///     // Run with automatic signal handling
///     let summary = run_with_shutdown(pipeline).await?;
///     println!("interrupted: {}", summary.interrupted);
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(pipeline: Pipeline) -> Result<RunSummary> {
    let shutdown = pipeline.shutdown_handle();
    let signal_task = tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.cancel();
    });

    let summary = pipeline.run().await;
    signal_task.abort();
    summary
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
