//! Worker pool integration tests
//!
//! This module tests job execution through the daemon including:
//! - Status lifecycle and monotonic transitions
//! - Per-queue concurrency ceilings and FIFO admission
//! - Failure, panic and retry handling
//! - Requested id mapping and status snapshots

mod common;

use std::time::Duration;

use common::*;
use librarian_worker::jobs::builtin_commands;
use librarian_worker::{CommandTable, EnqueueOptions, JobStatus, WorkerError};

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_noop_job_finishes() {
    let (daemon, _mailer) = daemon_with(2, builtin_commands());

    let job = daemon
        .enqueue(args(&["Library", "noop"]), EnqueueOptions::new())
        .await
        .unwrap();
    assert_eq!(job.queue, "default");
    assert_eq!(job.client, "local");

    let record = daemon.wait(&job.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Finished);
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());
    assert!(record.error.is_none());
    assert_eq!(record.attempts, 1);
    assert!(!job.has_worker());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_observed_statuses_are_monotonic() {
    let (daemon, _mailer) = daemon_with(1, builtin_commands());

    let jobs = vec![
        daemon
            .enqueue(args(&["Daemon", "sleep", "0.1"]), EnqueueOptions::new())
            .await
            .unwrap(),
        daemon
            .enqueue(args(&["Daemon", "sleep", "0.05"]), EnqueueOptions::new())
            .await
            .unwrap(),
        daemon
            .enqueue(args(&["Daemon", "fail"]), EnqueueOptions::new())
            .await
            .unwrap(),
    ];

    let rank = |status: JobStatus| match status {
        JobStatus::Queued => 0,
        JobStatus::Running => 1,
        _ => 2,
    };

    let mut last = vec![0; jobs.len()];
    let mut seen_terminal = vec![None; jobs.len()];
    let done = wait_until(TEST_TIMEOUT, || {
        for (i, job) in jobs.iter().enumerate() {
            let status = job.status();
            assert!(rank(status) >= last[i], "job {} regressed to {}", job.id, status);
            last[i] = rank(status);
            if status.is_terminal() {
                if let Some(previous) = seen_terminal[i] {
                    assert_eq!(previous, status, "terminal status changed");
                }
                seen_terminal[i] = Some(status);
            }
        }
        seen_terminal.iter().all(Option::is_some)
    })
    .await;

    assert!(done);
    assert_eq!(jobs[2].status(), JobStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_command_is_rejected_up_front() {
    let (daemon, _mailer) = daemon_with(2, builtin_commands());

    let err = daemon
        .enqueue(args(&["Library", "explode"]), EnqueueOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::UnknownCommand(_)));
    assert!(daemon.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_name_is_normalized() {
    let (daemon, _mailer) = daemon_with(2, builtin_commands());

    let job = daemon
        .enqueue(
            args(&["Library", "noop"]),
            EnqueueOptions::new().queue("TV Shows"),
        )
        .await
        .unwrap();
    assert_eq!(job.queue, "tv_shows");
    finish(&job).await;
}

// =============================================================================
// Admission
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_ceiling_is_never_exceeded() {
    let probe = Probe::new();
    let table = CommandTable::new().with(
        "Test",
        "hold",
        ProbeCommand::holding(&probe, Duration::from_millis(100)),
    );
    let (daemon, _mailer) = daemon_with(8, table);

    let mut jobs = Vec::new();
    for _ in 0..6 {
        jobs.push(
            daemon
                .enqueue(
                    args(&["Test", "hold"]),
                    EnqueueOptions::new().queue("limited").concurrency(2),
                )
                .await
                .unwrap(),
        );
    }

    let mut saw_busy = false;
    let done = wait_until(TEST_TIMEOUT, || {
        let running = daemon.registry().running_in("limited");
        assert!(running <= 2, "{} jobs running in a queue limited to 2", running);
        saw_busy |= daemon.queue_busy("limited");
        jobs.iter().all(|j| j.status().is_terminal())
    })
    .await;

    assert!(done);
    assert!(saw_busy);
    assert_eq!(probe.started(), 6);
    assert!(probe.max_alive() <= 2);
    assert_eq!(daemon.queue_limit("limited"), Some(2));
    assert!(!daemon.queue_busy("limited"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_queue_limit_wins() {
    let (daemon, _mailer) = daemon_with(2, builtin_commands());

    let first = daemon
        .enqueue(
            args(&["Library", "noop"]),
            EnqueueOptions::new().queue("downloads").concurrency(3),
        )
        .await
        .unwrap();
    let second = daemon
        .enqueue(
            args(&["Library", "noop"]),
            EnqueueOptions::new().queue("downloads").concurrency(1),
        )
        .await
        .unwrap();

    finish(&first).await;
    finish(&second).await;
    assert_eq!(daemon.queue_limit("downloads"), Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jobs_in_one_queue_start_in_submission_order() {
    let script = ScriptedCommand::new(vec![Step::Sleep(Duration::from_millis(10))]);
    let table = CommandTable::new().with("Test", "step", script.clone());
    let (daemon, _mailer) = daemon_with(4, table);

    let mut submitted = Vec::new();
    for _ in 0..5 {
        let job = daemon
            .enqueue(args(&["Test", "step"]), EnqueueOptions::new().queue("fifo"))
            .await
            .unwrap();
        submitted.push(job);
    }
    for job in &submitted {
        finish(job).await;
    }

    let started: Vec<_> = script.invocations().into_iter().map(|i| i.job_id).collect();
    let expected: Vec<_> = submitted.iter().map(|j| j.id.clone()).collect();
    assert_eq!(started, expected);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_command_error_is_recorded_on_job() {
    let (daemon, _mailer) = daemon_with(2, builtin_commands());

    let job = daemon
        .enqueue(
            args(&["Daemon", "fail", "tracker", "unreachable"]),
            EnqueueOptions::new(),
        )
        .await
        .unwrap();

    let record = daemon.wait(&job.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("tracker unreachable"));

    // The pool keeps working after a failure
    let next = daemon
        .enqueue(args(&["Library", "noop"]), EnqueueOptions::new())
        .await
        .unwrap();
    assert_eq!(finish(&next).await, JobStatus::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_command_fails_job() {
    let table = CommandTable::new().with(
        "Test",
        "panic",
        ScriptedCommand::new(vec![Step::Panic("kaboom".to_string())]),
    );
    let (daemon, _mailer) = daemon_with(1, table);

    let job = daemon
        .enqueue(args(&["Test", "panic"]), EnqueueOptions::new())
        .await
        .unwrap();

    assert_eq!(finish(&job).await, JobStatus::Failed);
    assert_eq!(job.error().as_deref(), Some("command panicked: kaboom"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_attempts_are_retried() {
    let table = CommandTable::new().with(
        "Test",
        "flaky",
        ScriptedCommand::new(vec![Step::FailUntilAttempt(3)]),
    );
    let (daemon, _mailer) = daemon_with(2, table);

    let recovered = daemon
        .enqueue(args(&["Test", "flaky"]), EnqueueOptions::new().max_retries(2))
        .await
        .unwrap();
    assert_eq!(finish(&recovered).await, JobStatus::Finished);
    assert_eq!(recovered.attempts(), 3);

    let exhausted = daemon
        .enqueue(args(&["Test", "flaky"]), EnqueueOptions::new().max_retries(1))
        .await
        .unwrap();
    assert_eq!(finish(&exhausted).await, JobStatus::Failed);
    assert_eq!(exhausted.attempts(), 2);
    assert_eq!(exhausted.error().as_deref(), Some("attempt 2 failed"));
}

// =============================================================================
// Ids, snapshots and output
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_requested_id_is_used_or_replaced() {
    let (daemon, _mailer) = daemon_with(2, builtin_commands());

    let first = daemon
        .enqueue(
            args(&["Library", "noop"]),
            EnqueueOptions::new().requested_id("nightly-scan"),
        )
        .await
        .unwrap();
    assert_eq!(first.id, "nightly-scan");
    finish(&first).await;

    let second = daemon
        .enqueue(
            args(&["Library", "noop"]),
            EnqueueOptions::new().requested_id("nightly-scan"),
        )
        .await
        .unwrap();
    assert_ne!(second.id, "nightly-scan");
    finish(&second).await;

    // The job that really carries the id stays reachable under it
    assert_eq!(daemon.job_record("nightly-scan").unwrap().id, first.id);
    assert_eq!(daemon.job_record(&second.id).unwrap().id, second.id);
    assert_eq!(daemon.status_snapshot().finished, vec![first.id.clone(), second.id.clone()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_classifies_each_job_once() {
    let probe = Probe::new();
    let table = builtin_commands().with("Test", "forever", ProbeCommand::forever(&probe));
    let (daemon, _mailer) = daemon_with(4, table);

    let running = daemon
        .enqueue(args(&["Test", "forever"]), EnqueueOptions::new().queue("slow"))
        .await
        .unwrap();
    let queued = daemon
        .enqueue(args(&["Test", "forever"]), EnqueueOptions::new().queue("slow"))
        .await
        .unwrap();
    let done = daemon
        .enqueue(args(&["Library", "noop"]), EnqueueOptions::new())
        .await
        .unwrap();
    until_running(&running).await;
    finish(&done).await;

    let snapshot = daemon.status_snapshot();
    assert_eq!(snapshot.running, vec![running.id.clone()]);
    assert_eq!(snapshot.queued, vec![queued.id.clone()]);
    assert_eq!(snapshot.finished, vec![done.id.clone()]);
    assert_eq!(snapshot.total(), 3);

    let slow = snapshot.queues.iter().find(|q| q.queue == "slow").unwrap();
    assert_eq!((slow.running, slow.queued, slow.total, slow.limit), (1, 1, 2, 1));

    assert_eq!(daemon.kill("all").await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_captured_output_is_retrievable() {
    let (daemon, _mailer) = daemon_with(2, builtin_commands());

    let job = daemon
        .enqueue(
            args(&["Daemon", "echo", "hello", "library"]),
            EnqueueOptions::new().capture_output(true),
        )
        .await
        .unwrap();

    let record = daemon.wait(&job.id).await.unwrap();
    assert_eq!(record.output.as_deref(), Some("hello library"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pretend_flag_reaches_command() {
    let (daemon, _mailer) = daemon_with(1, builtin_commands());

    let job = daemon
        .enqueue(
            args(&["Daemon", "sleep", "30"]),
            EnqueueOptions::new()
                .capture_output(true)
                .env_flags(librarian_worker::EnvFlags {
                    pretend: true,
                    ..Default::default()
                }),
        )
        .await
        .unwrap();

    assert_eq!(finish(&job).await, JobStatus::Finished);
    assert_eq!(job.output(), vec!["would sleep 30s"]);
}
