//! Cancellation integration tests
//!
//! This module tests `Daemon::kill` including:
//! - Hard-stopping running jobs within the grace window
//! - Removing queued jobs before they start
//! - `kill("all")` and the requested id mapping
//! - Unknown ids
//! - Shutdown racing new submissions

mod common;

use std::time::Duration;

use common::*;
use librarian_worker::jobs::builtin_commands;
use librarian_worker::{CommandTable, EnqueueOptions, JobStatus};

fn forever_table(probe: &Probe) -> CommandTable {
    builtin_commands().with("Test", "forever", ProbeCommand::forever(probe))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_running_job_stops_execution_unit() {
    let probe = Probe::new();
    let (daemon, _mailer) = daemon_with(2, forever_table(&probe));

    let job = daemon
        .enqueue(args(&["Test", "forever"]), EnqueueOptions::new())
        .await
        .unwrap();
    until_running(&job).await;
    assert!(wait_until(TEST_TIMEOUT, || probe.alive() == 1).await);

    assert_eq!(daemon.kill(&job.id).await, 1);

    let stopped = wait_until(Duration::from_secs(1), || probe.alive() == 0).await;
    assert!(stopped, "execution unit still alive after kill");
    assert_eq!(job.status(), JobStatus::Cancelled);
    assert_eq!(job.error().as_deref(), Some("Cancelled"));
    assert!(job.finished_at().is_some());
    assert!(!job.has_worker());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_frees_queue_for_next_job() {
    let probe = Probe::new();
    let (daemon, _mailer) = daemon_with(2, forever_table(&probe));

    let blocker = daemon
        .enqueue(args(&["Test", "forever"]), EnqueueOptions::new().queue("q"))
        .await
        .unwrap();
    let waiting = daemon
        .enqueue(args(&["Library", "noop"]), EnqueueOptions::new().queue("q"))
        .await
        .unwrap();
    until_running(&blocker).await;
    assert_eq!(waiting.status(), JobStatus::Queued);

    daemon.kill(&blocker.id).await;
    assert_eq!(finish(&waiting).await, JobStatus::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_queued_job_never_starts() {
    let probe = Probe::new();
    let (daemon, _mailer) = daemon_with(1, forever_table(&probe));

    let running = daemon
        .enqueue(args(&["Test", "forever"]), EnqueueOptions::new())
        .await
        .unwrap();
    let queued = daemon
        .enqueue(args(&["Test", "forever"]), EnqueueOptions::new())
        .await
        .unwrap();
    until_running(&running).await;

    assert_eq!(daemon.kill(&queued.id).await, 1);
    assert_eq!(queued.status(), JobStatus::Cancelled);
    assert!(queued.started_at().is_none());

    daemon.kill(&running.id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.started(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_unknown_id_reports_zero() {
    let (daemon, _mailer) = daemon_with(1, builtin_commands());
    assert_eq!(daemon.kill("no-such-job").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_finished_job_is_a_no_op() {
    let (daemon, _mailer) = daemon_with(1, builtin_commands());

    let job = daemon
        .enqueue(args(&["Library", "noop"]), EnqueueOptions::new())
        .await
        .unwrap();
    finish(&job).await;

    assert_eq!(daemon.kill(&job.id).await, 0);
    assert_eq!(job.status(), JobStatus::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_resolves_requested_id() {
    let probe = Probe::new();
    let (daemon, _mailer) = daemon_with(2, forever_table(&probe));

    let first = daemon
        .enqueue(
            args(&["Test", "forever"]),
            EnqueueOptions::new().requested_id("grab").queue("a"),
        )
        .await
        .unwrap();
    let second = daemon
        .enqueue(
            args(&["Test", "forever"]),
            EnqueueOptions::new().requested_id("grab").queue("b"),
        )
        .await
        .unwrap();
    until_running(&second).await;

    // "grab" now maps to the second submission
    assert_eq!(daemon.kill("grab").await, 1);
    assert_eq!(second.status(), JobStatus::Cancelled);
    assert_eq!(first.status(), JobStatus::Running);

    daemon.kill(&first.id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_all_cancels_everything_and_clears_mapping() {
    let probe = Probe::new();
    let (daemon, _mailer) = daemon_with(2, forever_table(&probe));

    let mut jobs = Vec::new();
    for (i, queue) in ["a", "b", "b"].into_iter().enumerate() {
        let job = daemon
            .enqueue(
                args(&["Test", "forever"]),
                EnqueueOptions::new()
                    .queue(queue)
                    .requested_id(format!("req-{}", i)),
            )
            .await
            .unwrap();
        jobs.push(job);
    }
    daemon.registry().map_id("alias", &jobs[0].id);
    until_running(&jobs[0]).await;
    until_running(&jobs[1]).await;

    assert_eq!(daemon.kill("all").await, 3);
    assert!(jobs.iter().all(|j| j.status() == JobStatus::Cancelled));
    assert!(wait_until(Duration::from_secs(1), || probe.alive() == 0).await);
    assert!(daemon.job_record("alias").is_err());
    // Jobs whose id was the requested id stay reachable by that id
    assert!(daemon.job_record("req-0").is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_inline_parent_cancels_inline_children() {
    let probe = Probe::new();
    let parent_script = ScriptedCommand::new(vec![Step::enqueue(
        &["Test", "forever"],
        EnqueueOptions::new().queue("inner").child(true),
    )]);
    let table = forever_table(&probe).with("Test", "parent", parent_script);
    let (daemon, _mailer) = daemon_with(1, table);

    let parent = daemon
        .enqueue(args(&["Test", "parent"]), EnqueueOptions::new())
        .await
        .unwrap();
    assert!(wait_until(TEST_TIMEOUT, || probe.alive() == 1).await);

    let child_id = parent.children_ids()[0].clone();
    let child = daemon.registry().get(&child_id).unwrap();
    assert!(child.child);
    assert_eq!(child.status(), JobStatus::Running);

    assert_eq!(daemon.kill(&parent.id).await, 1);
    assert!(wait_until(Duration::from_secs(1), || probe.alive() == 0).await);
    assert_eq!(child.status(), JobStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_leaves_no_job_queued() {
    let probe = Probe::new();
    let (daemon, _mailer) = daemon_with(2, forever_table(&probe));

    let submitters: Vec<_> = (0..8)
        .map(|i| {
            let daemon = daemon.clone();
            tokio::spawn(async move {
                let queue = format!("q{}", i % 3);
                for _ in 0..500 {
                    let opts = EnqueueOptions::new().queue(queue.as_str());
                    let submitted = daemon.enqueue(args(&["Test", "forever"]), opts).await;
                    if submitted.is_err() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    daemon.shutdown().await;
    for submitter in submitters {
        submitter.await.unwrap();
    }

    assert!(daemon.is_shutting_down());
    assert!(daemon
        .enqueue(args(&["Library", "noop"]), EnqueueOptions::new())
        .await
        .is_err());
    let stuck: Vec<_> = daemon
        .registry()
        .list()
        .into_iter()
        .filter(|job| !job.status().is_terminal())
        .map(|job| job.id.clone())
        .collect();
    assert!(stuck.is_empty(), "jobs left behind after shutdown: {:?}", stuck);
    assert!(wait_until(Duration::from_secs(1), || probe.alive() == 0).await);
}
