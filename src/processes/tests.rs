use super::*;
use crate::config::{RemoteConfig, SourceConfig};
use crate::error::IdentityError;
use std::sync::atomic::AtomicUsize;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(2);

fn config(downloads: usize) -> Config {
    let mut config = Config::default();
    config.sources.insert(
        "music".to_string(),
        SourceConfig {
            remote_name: "gdrive".to_string(),
            remote_path: String::new(),
        },
    );
    config.remotes.insert(
        "gdrive".to_string(),
        RemoteConfig {
            max_concurrent_downloads: downloads,
        },
    );
    config.settings.max_concurrent_extracts = 1;
    config.settings.max_concurrent_deletes = 1;
    config
}

fn manager(downloads: usize) -> ProcessManager {
    ProcessManager::new(&config(downloads), Arc::new(IdentityRegistry::new()))
}

fn done(identity: &Identity) -> TaskBody {
    let identity = identity.clone();
    Box::pin(async move {
        vec![ProcessResult::new(
            ResultStatus::Done,
            identity.clone(),
            identity,
        )]
    })
}

/// A body that blocks until `gate` is notified
fn gated(identity: &Identity, gate: Arc<Notify>, started: Arc<AtomicUsize>) -> TaskBody {
    let identity = identity.clone();
    Box::pin(async move {
        started.fetch_add(1, Ordering::SeqCst);
        gate.notified().await;
        vec![ProcessResult::new(
            ResultStatus::Done,
            identity.clone(),
            identity,
        )]
    })
}

fn exploding() -> TaskBody {
    Box::pin(async {
        let corrupt = true;
        if corrupt {
            panic!("corrupt header");
        }
        Vec::new()
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

// ---------------------------------------------------------------------------
// Submission and tracking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submitted_task_completes_and_is_correlated() {
    let processes = manager(2);
    let identity = Identity::new("music", "a.mp3");

    let task = processes
        .submit(
            PoolKind::Download,
            identity.clone(),
            identity.clone(),
            done(&identity),
        )
        .unwrap();

    assert_eq!(processes.identity_of(task).unwrap(), identity);
    assert!(processes.registry().is_active(&identity));

    let completion = processes.next_completion(WAIT).await.unwrap();
    assert_eq!(completion.task, task);
    match completion.outcome {
        TaskOutcome::Finished(results) => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].status, ResultStatus::Done);
        }
        TaskOutcome::Cancelled => panic!("task should have run"),
    }

    let info = processes.remove(task).unwrap();
    assert_eq!(info.kind, PoolKind::Download);
    assert!(!processes.registry().is_active(&identity));
    assert!(!processes.has_tracked());
}

#[tokio::test]
async fn duplicate_identity_is_rejected() {
    let processes = manager(1);
    let identity = Identity::new("music", "a.mp3");
    let gate = Arc::new(Notify::new());
    let started = Arc::new(AtomicUsize::new(0));

    processes
        .submit(
            PoolKind::Download,
            identity.clone(),
            identity.clone(),
            gated(&identity, Arc::clone(&gate), Arc::clone(&started)),
        )
        .unwrap();

    let second = processes.submit(
        PoolKind::Extract,
        identity.clone(),
        identity.clone(),
        done(&identity),
    );

    assert!(matches!(
        second,
        Err(Error::Task(TaskError::Duplicate { .. }))
    ));
    gate.notify_waiters();
}

#[tokio::test]
async fn identity_active_elsewhere_is_rejected() {
    let processes = manager(1);
    let identity = Identity::new("music", "a.mp3");
    processes
        .registry()
        .acquire(&identity, PoolKind::Delete)
        .unwrap();

    let result = processes.submit(
        PoolKind::Download,
        identity.clone(),
        identity.clone(),
        done(&identity),
    );

    assert!(matches!(
        result,
        Err(Error::Identity(IdentityError::InUse { .. }))
    ));
    assert!(!processes.has_tracked());
}

#[tokio::test]
async fn unknown_task_handles_are_rejected() {
    let processes = manager(1);
    let ghost = TaskId(42);

    assert!(matches!(
        processes.remove(ghost),
        Err(Error::Task(TaskError::UnknownFuture { .. }))
    ));
    assert!(matches!(
        processes.identity_of(ghost),
        Err(Error::Task(TaskError::UnknownFuture { .. }))
    ));
    assert!(processes.cancel(ghost).is_err());
}

#[tokio::test]
async fn unmapped_source_is_rejected() {
    let processes = manager(1);
    let identity = Identity::new("photos", "a.jpg");

    let result = processes.submit(
        PoolKind::Download,
        identity.clone(),
        identity.clone(),
        done(&identity),
    );

    assert!(matches!(
        result,
        Err(Error::Task(TaskError::UnknownRemote { .. }))
    ));
    assert!(!processes.registry().is_active(&identity));
}

// ---------------------------------------------------------------------------
// Pool bounds and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn download_pool_bounds_concurrency() {
    let processes = manager(2);
    let gate = Arc::new(Notify::new());
    let started = Arc::new(AtomicUsize::new(0));

    for i in 0..5 {
        let identity = Identity::new("music", format!("{i}.mp3"));
        processes
            .submit(
                PoolKind::Download,
                identity.clone(),
                identity.clone(),
                gated(&identity, Arc::clone(&gate), Arc::clone(&started)),
            )
            .unwrap();
    }

    wait_until(|| started.load(Ordering::SeqCst) == 2).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(started.load(Ordering::SeqCst), 2);

    let mut finished = 0;
    while finished < 5 {
        gate.notify_waiters();
        if let Some(completion) = processes.next_completion(Duration::from_millis(20)).await {
            processes.remove(completion.task).unwrap();
            finished += 1;
        }
    }
    assert_eq!(started.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn cancelling_queued_task_reports_cancelled_without_running() {
    let processes = manager(1);
    let gate = Arc::new(Notify::new());
    let started = Arc::new(AtomicUsize::new(0));
    let running = Identity::new("music", "running.mp3");
    let queued = Identity::new("music", "queued.mp3");

    let running_task = processes
        .submit(
            PoolKind::Download,
            running.clone(),
            running.clone(),
            gated(&running, Arc::clone(&gate), Arc::clone(&started)),
        )
        .unwrap();
    wait_until(|| started.load(Ordering::SeqCst) == 1).await;

    let queued_task = processes
        .submit(
            PoolKind::Download,
            queued.clone(),
            queued.clone(),
            gated(&queued, Arc::clone(&gate), Arc::clone(&started)),
        )
        .unwrap();

    processes.cancel(queued_task).unwrap();
    processes.cancel(running_task).unwrap();

    let first = processes.next_completion(WAIT).await.unwrap();
    assert_eq!(first.task, queued_task);
    assert!(matches!(first.outcome, TaskOutcome::Cancelled));

    gate.notify_waiters();
    let second = processes.next_completion(WAIT).await.unwrap();
    assert_eq!(second.task, running_task);
    assert!(matches!(second.outcome, TaskOutcome::Finished(_)));
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn next_completion_times_out_when_idle() {
    let processes = manager(1);
    let started = std::time::Instant::now();

    assert!(
        processes
            .next_completion(Duration::from_millis(20))
            .await
            .is_none()
    );
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[tokio::test]
async fn panicking_body_becomes_failure_result() {
    let processes = manager(1);
    let identity = Identity::new("music", "boom.zip");

    processes
        .submit(
            PoolKind::Extract,
            identity.clone(),
            identity.clone(),
            exploding(),
        )
        .unwrap();

    let completion = processes.next_completion(WAIT).await.unwrap();
    match completion.outcome {
        TaskOutcome::Finished(results) => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].status, ResultStatus::ExtractFailed);
            let message = results[0].error.as_ref().unwrap().to_string();
            assert!(message.contains("corrupt header"), "message was: {}", message);
        }
        TaskOutcome::Cancelled => panic!("panicking task should report a result"),
    }
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_cancels_queued_and_waits_for_running() {
    let processes = Arc::new(manager(1));
    let gate = Arc::new(Notify::new());
    let started = Arc::new(AtomicUsize::new(0));

    for name in ["a.mp3", "b.mp3", "c.mp3"] {
        let identity = Identity::new("music", name);
        processes
            .submit(
                PoolKind::Download,
                identity.clone(),
                identity.clone(),
                gated(&identity, Arc::clone(&gate), Arc::clone(&started)),
            )
            .unwrap();
    }
    wait_until(|| started.load(Ordering::SeqCst) == 1).await;

    let shutdown = tokio::spawn({
        let processes = Arc::clone(&processes);
        async move { processes.shutdown_pools().await }
    });

    let mut cancelled = 0;
    for _ in 0..2 {
        let completion = processes.next_completion(WAIT).await.unwrap();
        assert!(matches!(completion.outcome, TaskOutcome::Cancelled));
        cancelled += 1;
    }
    assert_eq!(cancelled, 2);
    assert!(!shutdown.is_finished());

    gate.notify_waiters();
    tokio::time::timeout(WAIT, shutdown).await.unwrap().unwrap();

    let last = processes.next_completion(WAIT).await.unwrap();
    assert!(matches!(last.outcome, TaskOutcome::Finished(_)));
    assert_eq!(started.load(Ordering::SeqCst), 1);

    let identity = Identity::new("music", "late.mp3");
    assert!(matches!(
        processes.submit(
            PoolKind::Download,
            identity.clone(),
            identity.clone(),
            done(&identity)
        ),
        Err(Error::ShuttingDown)
    ));
}

#[tokio::test]
async fn exit_task_runs_once() {
    let processes = manager(1);
    let runs = Arc::new(AtomicUsize::new(0));

    let first = processes.submit_exit_task(Box::pin({
        let runs = Arc::clone(&runs);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            runs.fetch_add(1, Ordering::SeqCst);
        }
    }));
    let second = processes.submit_exit_task(Box::pin({
        let runs = Arc::clone(&runs);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
        }
    }));

    assert!(first);
    assert!(!second);
    processes.wait_for_exit().await.unwrap();
    processes.close_exit_pool();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!processes.submit_exit_task(Box::pin(async {})));
}
