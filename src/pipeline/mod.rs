//! Synchronization pipeline
//!
//! [`Pipeline::run`] performs one synchronization run:
//!
//! 1. List every configured source through the [`RemoteTransport`]
//! 2. Skip files whose metadata record is clean and whose remote hash is
//!    unchanged; reset the record of every other file and pre-flag it
//!    `CANCELLED`
//! 3. Submit one download task per remaining file (a *root unit*)
//! 4. Drain task completions: archives found by a download or an extraction
//!    are queued for extraction in the same root unit, the first failure in a
//!    root unit cancels its queued tasks, and a root unit whose last file has
//!    finished is registered as processed or failed
//! 5. Run the exit sequence: stop background loops, shut the pools down,
//!    flush metadata
//!
//! A shutdown requested through [`Pipeline::shutdown_handle`] is observed
//! within one `completion_wait` interval. Results of tasks still running at
//! that point are not applied, so their records keep the `CANCELLED` flag and
//! are retried by the next run.

mod driver;
mod lifecycle;
mod progress_record;
mod tasks;

#[cfg(test)]
pub(crate) mod test_helpers;


use crate::config::Config;
use crate::error::Result;
use crate::extraction::{ArchiveTool, SevenZipCli};
use crate::identity::IdentityRegistry;
use crate::metadata::MetadataStore;
use crate::processes::ProcessManager;
use crate::progress::ProgressCounter;
use crate::transport::{RcloneTransport, RemoteTransport};
use crate::types::RunSummary;
use chrono::Utc;
use driver::{Driver, Intervals};
use lifecycle::ExitContext;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One configured synchronization job
pub struct Pipeline {
    config: Config,
    transport: Arc<dyn RemoteTransport>,
    archive_tool: Arc<dyn ArchiveTool>,
    shutdown_token: CancellationToken,
}

impl Pipeline {
    /// Create a pipeline from a configuration and its two collaborators
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration
    /// fails validation.
    pub fn new(
        config: Config,
        transport: Arc<dyn RemoteTransport>,
        archive_tool: Arc<dyn ArchiveTool>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            archive_tool,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Create a pipeline using the `rclone` and `7z` binaries
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = RcloneTransport::from_config(&config)?;
        let archive_tool = SevenZipCli::from_config(&config)?;
        tracing::info!(
            transport = transport.name(),
            archive_tool = archive_tool.name(),
            "using external tools"
        );
        Self::new(config, Arc::new(transport), Arc::new(archive_tool))
    }

    /// Configuration the pipeline was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that stops a running [`Pipeline::run`] when cancelled
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Perform one synchronization run
    ///
    /// # Errors
    ///
    /// - metadata document cannot be opened or created
    /// - a source cannot be listed
    /// - a contract violation (see [`Error::is_contract_violation`](crate::Error::is_contract_violation))
    ///
    /// The shutdown sequence, including the final metadata flush, has run by
    /// the time an error is returned. Task-level failures are not errors;
    /// they are counted in [`RunSummary::failed`].
    pub async fn run(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let settings = &self.config.settings;

        tokio::fs::create_dir_all(&settings.destination_dir).await?;
        let metadata =
            Arc::new(MetadataStore::open(&settings.metadata_path, settings.minimise_json).await?);
        let processes = Arc::new(ProcessManager::new(
            &self.config,
            Arc::new(IdentityRegistry::new()),
        ));
        let progress = Arc::new(ProgressCounter::new());

        let shutdown = self.shutdown_token.child_token();
        let background = CancellationToken::new();
        let driver_idle = CancellationToken::new();

        processes.submit_exit_task(Box::pin(lifecycle::exit_sequence(ExitContext {
            shutdown: shutdown.clone(),
            background: background.clone(),
            driver_idle: driver_idle.clone(),
            processes: Arc::clone(&processes),
            metadata: Arc::clone(&metadata),
        })));

        let mut driver = Driver {
            transport: Arc::clone(&self.transport),
            archive_tool: Arc::clone(&self.archive_tool),
            destination_root: settings.destination_dir.clone(),
            delete_archives: settings.delete_archives_after_extract,
            intervals: Intervals {
                completion_wait: settings.completion_wait,
                metadata_flush: settings.metadata_flush_interval,
                progress: settings.progress_interval,
            },
            metadata: Arc::clone(&metadata),
            processes: Arc::clone(&processes),
            progress: Arc::clone(&progress),
            shutdown: shutdown.clone(),
            background,
            background_tasks: Vec::new(),
            roots: HashMap::new(),
            skipped: 0,
            leaf_files: 0,
            interrupted: false,
        };

        let sources: Vec<String> = self.config.sources.keys().cloned().collect();
        let outcome = driver.drive(&sources).await;
        if let Err(e) = &outcome {
            tracing::error!(code = e.error_code(), error = %e, "run aborted");
        }

        driver_idle.cancel();
        shutdown.cancel();
        tracing::debug!("waiting for exit process");
        processes.wait_for_exit().await?;
        for handle in driver.background_tasks.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }

        let (processed, failed) = progress.counts();
        let total = progress.total().unwrap_or(0);
        tracing::info!("{}/{} files have been successfully processed", processed, total);

        outcome?;
        Ok(RunSummary {
            total,
            processed,
            failed,
            skipped: driver.skipped,
            leaf_files: driver.leaf_files,
            interrupted: driver.interrupted,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
