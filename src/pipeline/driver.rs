//! The driver loop: listing, resume decisions, dispatch, and the
//! per-completion state machine.
//!
//! The driver is the only consumer of the completion stream and the only
//! owner of [`RootProgress`] records, so the root map needs no lock.

use super::progress_record::{RootOutcome, RootProgress};
use super::tasks;
use crate::error::{Error, Result, TaskError};
use crate::extraction::ArchiveTool;
use crate::metadata::{MetadataStore, spawn_flush_loop};
use crate::processes::{Completion, ProcessManager, TaskBody, TaskInfo, TaskOutcome};
use crate::progress::{ProgressCounter, spawn_progress_reporter};
use crate::transport::RemoteTransport;
use crate::types::{ErrorFlag, FileKind, Identity, PoolKind, ProcessResult, RemoteFile, ResultStatus};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Timer intervals of the background loops
pub(crate) struct Intervals {
    pub(crate) completion_wait: Duration,
    pub(crate) metadata_flush: Duration,
    pub(crate) progress: Duration,
}

pub(crate) struct Driver {
    pub(crate) transport: Arc<dyn RemoteTransport>,
    pub(crate) archive_tool: Arc<dyn ArchiveTool>,
    pub(crate) destination_root: PathBuf,
    pub(crate) delete_archives: bool,
    pub(crate) intervals: Intervals,
    pub(crate) metadata: Arc<MetadataStore>,
    pub(crate) processes: Arc<ProcessManager>,
    pub(crate) progress: Arc<ProgressCounter>,
    /// Fires when the run must stop
    pub(crate) shutdown: CancellationToken,
    /// Stops the flush loop and the progress reporter
    pub(crate) background: CancellationToken,
    pub(crate) background_tasks: Vec<JoinHandle<()>>,
    pub(crate) roots: HashMap<Identity, RootProgress>,
    pub(crate) skipped: u64,
    pub(crate) leaf_files: u64,
    pub(crate) interrupted: bool,
}

impl Driver {
    /// Run every phase up to the point where no tracked task remains
    pub(crate) async fn drive(&mut self, sources: &[String]) -> Result<()> {
        info!("Fetching file lists from sources");
        let listings = self.fetch_listings(sources).await?;
        if self.observe_shutdown() {
            return Ok(());
        }

        info!("Starting processes");
        self.background_tasks.push(spawn_flush_loop(
            Arc::clone(&self.metadata),
            self.intervals.metadata_flush,
            self.background.clone(),
        ));

        let dispatched = self.dispatch(listings)?;
        self.progress.set_total(dispatched)?;
        self.background_tasks.push(spawn_progress_reporter(
            Arc::clone(&self.progress),
            self.intervals.progress,
            self.background.clone(),
        ));
        info!(
            dispatched,
            skipped = self.skipped,
            "Waiting for processes"
        );

        self.drain().await?;
        info!("Finished processing results");
        Ok(())
    }

    /// Check the shutdown token, remembering that the run was interrupted
    fn observe_shutdown(&mut self) -> bool {
        if self.shutdown.is_cancelled() {
            self.interrupted = true;
        }
        self.interrupted
    }

    async fn fetch_listings(&mut self, sources: &[String]) -> Result<Vec<(String, Vec<RemoteFile>)>> {
        let mut listings = Vec::with_capacity(sources.len());
        for source in sources {
            let listed = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                listed = self.transport.list_files(source) => Some(listed),
            };
            let Some(listed) = listed else {
                self.interrupted = true;
                break;
            };

            let mut files = listed?;
            files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
            info!(source = %source, files = files.len(), "listed source");
            listings.push((source.clone(), files));
        }
        Ok(listings)
    }

    /// Apply the resume rule to every listed file and submit downloads
    ///
    /// Returns the number of root units dispatched.
    fn dispatch(&mut self, listings: Vec<(String, Vec<RemoteFile>)>) -> Result<u64> {
        let mut dispatched = 0;

        'sources: for (source, files) in listings {
            for file in files {
                if self.observe_shutdown() {
                    break 'sources;
                }

                let identity = Identity::new(source.as_str(), &file.relative_path);
                if !identity.is_complete() {
                    warn!(source = %source, path = %file.relative_path, "ignoring listing entry without a path");
                    continue;
                }
                if self.metadata.is_up_to_date(&identity, &file.hash) {
                    debug!(key = %identity, "already processed, skipping");
                    self.skipped += 1;
                    continue;
                }

                self.metadata.prepare_for_dispatch(&identity, &file.hash);
                let mut progress =
                    RootProgress::new(identity.clone(), self.metadata.record(&identity)?);
                let body = tasks::download_file(
                    Arc::clone(&self.transport),
                    Arc::clone(&self.archive_tool),
                    identity.clone(),
                    self.destination_root.clone(),
                );

                match self
                    .processes
                    .submit(PoolKind::Download, identity.clone(), identity.clone(), body)
                {
                    Ok(task) => {
                        progress.track(task, identity.clone());
                        self.roots.insert(identity, progress);
                        dispatched += 1;
                    }
                    Err(Error::ShuttingDown) => {
                        self.interrupted = true;
                        break 'sources;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(dispatched)
    }

    /// Consume completions until no tracked task remains or shutdown is requested
    async fn drain(&mut self) -> Result<()> {
        while self.processes.has_tracked() {
            if self.observe_shutdown() {
                break;
            }

            let completion = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                completion = self.processes.next_completion(self.intervals.completion_wait) => completion,
            };
            if let Some(completion) = completion {
                self.handle_completion(completion)?;
            }
        }
        Ok(())
    }

    pub(crate) fn handle_completion(&mut self, completion: Completion) -> Result<()> {
        let Completion { task, outcome } = completion;
        let info = self.processes.remove(task)?;
        let mut progress = self.roots.remove(&info.root).ok_or_else(|| TaskError::UnknownFuture {
            task: task.to_string(),
        })?;
        progress.complete(task, &info.identity);

        match outcome {
            TaskOutcome::Cancelled => {
                debug!(%task, key = %info.identity, "task cancelled before it started");
                progress.cancelled = true;
            }
            TaskOutcome::Finished(results) => {
                for result in results {
                    self.apply_result(&mut progress, &info, result)?;
                }
            }
        }

        if progress.is_complete() {
            self.finalize(progress)
        } else {
            self.roots.insert(info.root, progress);
            Ok(())
        }
    }

    fn apply_result(
        &mut self,
        progress: &mut RootProgress,
        info: &TaskInfo,
        result: ProcessResult,
    ) -> Result<()> {
        let ProcessResult {
            status,
            identity,
            parent,
            error,
            ..
        } = result;

        if let Some(parent) = &parent {
            self.metadata.initialize(&identity);
            self.metadata.set_parent(&identity, Some(parent));
        }

        match status {
            ResultStatus::Done => match info.kind {
                PoolKind::Extract if identity == info.identity => {
                    if self.delete_archives && progress.accepts_follow_up() {
                        let body = tasks::delete_archive(
                            identity.clone(),
                            progress.root.clone(),
                            self.destination_root.clone(),
                        );
                        self.submit_follow_up(progress, PoolKind::Delete, identity, body)?;
                    }
                }
                PoolKind::Delete => {}
                _ => self.leaf_files += 1,
            },
            ResultStatus::ExtractNeeded => {
                self.metadata.set_file_kind(&identity, FileKind::Archive);
                if progress.accepts_follow_up() {
                    let body = tasks::extract_archive(
                        Arc::clone(&self.archive_tool),
                        identity.clone(),
                        progress.root.clone(),
                        self.destination_root.clone(),
                    );
                    self.submit_follow_up(progress, PoolKind::Extract, identity, body)?;
                } else {
                    debug!(key = %identity, "root unit halted, not extracting");
                }
            }
            ResultStatus::DownloadFailed | ResultStatus::ExtractFailed | ResultStatus::DeleteFailed => {
                if let Some(flag) = status.error_flag() {
                    self.metadata.set_error_flag(&identity, flag, true);
                    self.metadata.set_error_flag(&progress.root, flag, true);
                }
                let error = error
                    .unwrap_or_else(|| Error::Other(format!("{:?} reported without a cause", status)));
                warn!(
                    key = %identity,
                    root = %progress.root,
                    code = error.error_code(),
                    error = %error,
                    "task failed"
                );
                progress.errors.push(error);

                if status != ResultStatus::DeleteFailed {
                    progress.halted = true;
                    for task in &progress.futures {
                        self.processes.cancel(*task)?;
                    }
                }
            }
        }

        if let Ok(record) = self.metadata.record(&progress.root) {
            progress.metadata = record;
        }
        Ok(())
    }

    fn submit_follow_up(
        &self,
        progress: &mut RootProgress,
        kind: PoolKind,
        identity: Identity,
        body: TaskBody,
    ) -> Result<()> {
        match self
            .processes
            .submit(kind, identity.clone(), progress.root.clone(), body)
        {
            Ok(task) => {
                progress.track(task, identity);
                Ok(())
            }
            Err(Error::ShuttingDown) => {
                debug!(key = %identity, %kind, "pools shut down, follow-up not submitted");
                progress.cancelled = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn finalize(&mut self, mut progress: RootProgress) -> Result<()> {
        self.metadata
            .set_error_flag(&progress.root, ErrorFlag::Cancelled, progress.cancelled);
        if let Ok(record) = self.metadata.record(&progress.root) {
            progress.metadata = record;
        }

        let outcome = progress.outcome();
        if !progress.errors.is_empty() {
            report_failure(&progress);
        }
        let (processed, failed) = match outcome {
            RootOutcome::Processed => self.progress.register_processed()?,
            RootOutcome::Failed | RootOutcome::Cancelled => self.progress.register_failed()?,
        };
        debug!(
            key = %progress.root,
            ?outcome,
            processed,
            failed,
            "root unit finished"
        );
        Ok(())
    }
}

fn report_failure(progress: &RootProgress) {
    let message = if progress.metadata.file_kind == FileKind::Archive {
        "errors occurred while processing archive file"
    } else {
        "errors occurred while downloading file"
    };
    let errors = progress
        .errors
        .iter()
        .map(|e| format!("[{}] {}", e.error_code(), error_chain(e)))
        .collect::<Vec<_>>()
        .join("\n");

    error!(
        source = %progress.root.source,
        path = %progress.root.relative_path,
        error_count = progress.errors.len(),
        errors = %errors,
        "{}",
        message
    );
}

/// `error` followed by each source, skipping causes already spelled out by
/// the message above them
pub(crate) fn error_chain(error: &Error) -> String {
    let mut chain = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        let text = cause.to_string();
        if !chain.contains(&text) {
            chain.push_str(": ");
            chain.push_str(&text);
        }
        source = cause.source();
    }
    chain
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use std::fmt;

    #[derive(Debug)]
    struct Leaf;

    impl fmt::Display for Leaf {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "disk quota exceeded")
        }
    }

    impl std::error::Error for Leaf {}

    #[derive(Debug)]
    struct Wrapper(Leaf);

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "write failed")
        }
    }

    impl std::error::Error for Wrapper {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn error_chain_appends_hidden_causes() {
        let error = Error::Io(std::io::Error::other(Wrapper(Leaf)));

        let chain = error_chain(&error);

        assert!(chain.starts_with("I/O error: write failed"));
        assert!(chain.ends_with(": disk quota exceeded"));
    }

    #[test]
    fn error_chain_does_not_repeat_wrapped_messages() {
        let error = Error::from(ExtractError::Failed {
            archive: PathBuf::from("album.zip"),
            reason: "bad header".to_string(),
        });

        assert_eq!(
            error_chain(&error),
            "extraction error: extraction failed for album.zip: bad header"
        );
    }
}
