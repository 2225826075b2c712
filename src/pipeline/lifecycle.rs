//! Coordinated shutdown.

use crate::metadata::MetadataStore;
use crate::processes::ProcessManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything the exit task needs to stop a run
pub(crate) struct ExitContext {
    /// Fires when the run must stop (signal or natural completion)
    pub(crate) shutdown: CancellationToken,
    /// Stops the flush loop and the progress reporter
    pub(crate) background: CancellationToken,
    /// Fires once the driver no longer touches metadata records
    pub(crate) driver_idle: CancellationToken,
    pub(crate) processes: Arc<ProcessManager>,
    pub(crate) metadata: Arc<MetadataStore>,
}

/// Body of the single-slot exit task
///
/// The sequence is:
/// 1. Stop the background timers
/// 2. Shut down every worker pool; queued tasks are cancelled, running tasks
///    are awaited
/// 3. Flush the metadata store once more
/// 4. Close the exit pool
pub(crate) async fn exit_sequence(ctx: ExitContext) {
    ctx.shutdown.cancelled().await;
    tracing::info!("Exit process started");

    ctx.background.cancel();

    tracing::info!("Waiting for current processes to finish");
    ctx.processes.shutdown_pools().await;

    // Records written after this point would miss the final flush
    ctx.driver_idle.cancelled().await;

    match ctx.metadata.flush().await {
        Ok(()) => tracing::info!(
            path = %ctx.metadata.path().display(),
            records = ctx.metadata.len(),
            "Final metadata flush complete"
        ),
        Err(e) => tracing::error!(
            path = %ctx.metadata.path().display(),
            error = %e,
            "Failed to flush metadata during shutdown"
        ),
    }

    ctx.processes.close_exit_pool();
}
