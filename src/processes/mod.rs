//! Process manager
//!
//! Bounded worker pools plus the task ↔ identity tracking table.
//!
//! Every submitted task is a tokio task that first waits for a permit from
//! its pool. Cancelling a task only wins while it is still waiting for that
//! permit; once the body has started it always runs to completion and
//! reports its results. Finished and cancelled tasks are reported on a
//! single completion stream consumed by the pipeline driver.
//!
//! ## Pools
//!
//! - one download pool per remote (sources are mapped to remotes)
//! - one extraction pool
//! - one deletion pool
//! - one single-slot exit pool running the shutdown sequence

mod pools;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::error::{Error, Result, TaskError};
use crate::identity::IdentityRegistry;
use crate::types::{Identity, PoolKind, ProcessResult, ResultStatus, TaskId};
use futures::FutureExt;
use futures::future::BoxFuture;
use pools::WorkerPools;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Body of a worker task
pub type TaskBody = BoxFuture<'static, Vec<ProcessResult>>;

/// How a tracked task ended
#[derive(Debug)]
pub enum TaskOutcome {
    /// The body ran and returned its results
    Finished(Vec<ProcessResult>),
    /// The task was cancelled (or its pool shut down) before it started
    Cancelled,
}

/// One entry of the completion stream
#[derive(Debug)]
pub struct Completion {
    /// Handle of the completed task
    pub task: TaskId,
    /// Outcome of the task
    pub outcome: TaskOutcome,
}

/// What a task handle refers to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    /// File the task works on
    pub identity: Identity,
    /// Root unit the task belongs to
    pub root: Identity,
    /// Pool the task was submitted to
    pub kind: PoolKind,
}

#[derive(Debug)]
struct TrackedTask {
    info: TaskInfo,
    cancel_token: CancellationToken,
}

#[derive(Debug, Default)]
struct TrackingTable {
    tasks: HashMap<TaskId, TrackedTask>,
    by_identity: HashMap<Identity, TaskId>,
}

/// Worker pools and the bookkeeping of every task submitted to them
#[derive(Debug)]
pub struct ProcessManager {
    pools: WorkerPools,
    registry: Arc<IdentityRegistry>,
    tracker: TaskTracker,
    table: Mutex<TrackingTable>,
    next_task_id: AtomicU64,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Completion>>,
    accepting: AtomicBool,
    exit_slot: Arc<Semaphore>,
    exit_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessManager {
    /// Create the pools described by `config`
    pub fn new(config: &Config, registry: Arc<IdentityRegistry>) -> Self {
        let pools = WorkerPools::new(
            &config.download_workers_per_remote(),
            config.settings.max_concurrent_extracts,
            config.settings.max_concurrent_deletes,
            config.source_remote_map(),
        );
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Self {
            pools,
            registry,
            tracker: TaskTracker::new(),
            table: Mutex::new(TrackingTable::default()),
            next_task_id: AtomicU64::new(1),
            completion_tx,
            completion_rx: tokio::sync::Mutex::new(completion_rx),
            accepting: AtomicBool::new(true),
            exit_slot: Arc::new(Semaphore::new(1)),
            exit_handle: Mutex::new(None),
        }
    }

    fn table(&self) -> MutexGuard<'_, TrackingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity registry guarding submissions
    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// Submit `body` to the pool selected by `kind` and `identity`
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once the pools have been shut down
    /// - [`TaskError::UnknownRemote`] if the identity's source has no download pool
    /// - [`TaskError::Duplicate`] if a task is already tracked for `identity`
    /// - [`IdentityError::InUse`](crate::error::IdentityError::InUse) if the
    ///   identity is active elsewhere
    pub fn submit(
        &self,
        kind: PoolKind,
        identity: Identity,
        root: Identity,
        body: TaskBody,
    ) -> Result<TaskId> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        let pool = self.pools.select(kind, &identity)?;
        let semaphore = Arc::clone(&pool.semaphore);

        let mut table = self.table();
        if table.by_identity.contains_key(&identity) {
            return Err(TaskError::Duplicate {
                key: identity.key(),
            }
            .into());
        }
        self.registry.acquire(&identity, kind)?;

        let task = TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed));
        let cancel_token = CancellationToken::new();
        let info = TaskInfo {
            identity: identity.clone(),
            root,
            kind,
        };
        table.tasks.insert(
            task,
            TrackedTask {
                info: info.clone(),
                cancel_token: cancel_token.clone(),
            },
        );
        table.by_identity.insert(identity, task);
        drop(table);

        tracing::debug!(
            %task,
            pool = %pool.name,
            pool_size = pool.size,
            key = %info.identity,
            "submitted task"
        );

        self.tracker.spawn(run_task(
            task,
            info,
            semaphore,
            cancel_token,
            body,
            self.completion_tx.clone(),
        ));
        Ok(task)
    }

    /// Prevent `task` from starting if it has not started yet
    pub fn cancel(&self, task: TaskId) -> Result<()> {
        let table = self.table();
        let tracked = table
            .tasks
            .get(&task)
            .ok_or_else(|| unknown_future(task))?;
        tracked.cancel_token.cancel();
        Ok(())
    }

    /// Stop tracking `task` and release its identity
    pub fn remove(&self, task: TaskId) -> Result<TaskInfo> {
        let mut table = self.table();
        let tracked = table
            .tasks
            .remove(&task)
            .ok_or_else(|| unknown_future(task))?;
        table.by_identity.remove(&tracked.info.identity);
        self.registry.release(&tracked.info.identity);
        Ok(tracked.info)
    }

    /// Identity `task` works on
    pub fn identity_of(&self, task: TaskId) -> Result<Identity> {
        Ok(self.info(task)?.identity)
    }

    /// Everything known about `task`
    pub fn info(&self, task: TaskId) -> Result<TaskInfo> {
        self.table()
            .tasks
            .get(&task)
            .map(|tracked| tracked.info.clone())
            .ok_or_else(|| unknown_future(task))
    }

    /// Number of tracked tasks
    pub fn tracked_count(&self) -> usize {
        self.table().tasks.len()
    }

    /// Whether any task is still tracked
    pub fn has_tracked(&self) -> bool {
        self.tracked_count() > 0
    }

    /// Wait up to `wait` for the next finished or cancelled task
    ///
    /// Returns `None` when nothing completed within `wait`.
    pub async fn next_completion(&self, wait: Duration) -> Option<Completion> {
        let mut rx = self.completion_rx.lock().await;
        tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
    }

    /// Shut down every worker pool
    ///
    /// New submissions are rejected, tasks still waiting for a permit resolve
    /// as cancelled, and running tasks are awaited.
    pub async fn shutdown_pools(&self) {
        self.accepting.store(false, Ordering::Release);
        self.pools.close_all();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!("worker pools shut down");
    }

    /// Run `body` in the single-slot exit pool
    ///
    /// Returns `false` if an exit task was already submitted.
    pub fn submit_exit_task(&self, body: BoxFuture<'static, ()>) -> bool {
        let Ok(permit) = Arc::clone(&self.exit_slot).try_acquire_owned() else {
            return false;
        };
        let handle = tokio::spawn(async move {
            body.await;
            drop(permit);
        });
        *self
            .exit_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Refuse any further exit task
    pub fn close_exit_pool(&self) {
        self.exit_slot.close();
    }

    /// Wait until the exit task (if any) has finished
    pub async fn wait_for_exit(&self) -> Result<()> {
        let handle = self
            .exit_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Other(format!("exit task failed: {}", e))),
            None => Ok(()),
        }
    }
}

fn unknown_future(task: TaskId) -> Error {
    TaskError::UnknownFuture {
        task: task.to_string(),
    }
    .into()
}

async fn run_task(
    task: TaskId,
    info: TaskInfo,
    semaphore: Arc<Semaphore>,
    cancel_token: CancellationToken,
    body: TaskBody,
    completion_tx: mpsc::UnboundedSender<Completion>,
) {
    let outcome = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => TaskOutcome::Cancelled,
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => {
                let results = match AssertUnwindSafe(body).catch_unwind().await {
                    Ok(results) => results,
                    Err(panic) => vec![panicked_result(&info, panic.as_ref())],
                };
                drop(permit);
                TaskOutcome::Finished(results)
            }
            // Pool closed before the task got a slot
            Err(_) => TaskOutcome::Cancelled,
        },
    };

    if completion_tx.send(Completion { task, outcome }).is_err() {
        tracing::debug!(%task, "completion stream closed, dropping result");
    }
}

fn panicked_result(info: &TaskInfo, panic: &(dyn std::any::Any + Send)) -> ProcessResult {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(key = %info.identity, kind = %info.kind, %message, "task panicked");

    let status = match info.kind {
        PoolKind::Download => ResultStatus::DownloadFailed,
        PoolKind::Extract => ResultStatus::ExtractFailed,
        PoolKind::Delete => ResultStatus::DeleteFailed,
    };
    ProcessResult::new(ResultStatus::Done, info.identity.clone(), info.root.clone())
        .fail(status, Error::Other(format!("task panicked: {}", message)))
}
