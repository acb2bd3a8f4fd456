//! Test fixtures for worker integration tests
//!
//! Provides template directories and daemon builders.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use librarian_worker::{Daemon, Job, JobStatus};
use tempfile::TempDir;

/// Upper bound for anything a test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Template directory populated with `(name, toml body)` pairs
pub fn template_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("create template dir");
    for (name, body) in files {
        fs::write(dir.path().join(format!("{}.toml", name)), body).expect("write template");
    }
    dir
}

/// Wait for a job to reach a terminal state, failing the test on timeout
pub async fn finish(job: &Arc<Job>) -> JobStatus {
    tokio::time::timeout(TEST_TIMEOUT, job.wait_terminal())
        .await
        .expect("job did not finish in time")
}

/// Wait until `job` reports running
pub async fn until_running(job: &Arc<Job>) {
    let running = librarian_test_utils::wait_until(TEST_TIMEOUT, || {
        job.status() == JobStatus::Running
    })
    .await;
    assert!(running, "job {} never started", job.id);
}

/// Ids of every job in the registry, in submission order
pub fn job_ids(daemon: &Daemon) -> Vec<String> {
    daemon.registry().list().iter().map(|j| j.id.clone()).collect()
}
