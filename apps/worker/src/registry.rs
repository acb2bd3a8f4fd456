//! Job registry
//!
//! Thread-safe store of every job the daemon has seen, plus the mapping from
//! client-requested ids to the ids jobs actually run under. Jobs are kept
//! after completion so they can still be looked up.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};
use crate::job::{Job, JobRecord, JobStatus, JobView};

/// Short job description used in snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub queue: String,
    pub task: String,
    pub status: JobStatus,
}

/// Per-queue counters from one snapshot pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub queue: String,
    pub running: usize,
    pub queued: usize,
    pub finished: usize,
    pub total: usize,
    pub limit: usize,
}

/// Point-in-time classification of every job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub running: Vec<String>,
    pub queued: Vec<String>,
    /// Finished, failed and cancelled jobs
    pub finished: Vec<String>,
    pub queues: Vec<QueueMetrics>,
    pub jobs: Vec<JobSummary>,
}

impl StatusSnapshot {
    pub fn total(&self) -> usize {
        self.jobs.len()
    }
}

/// Classify jobs into running, queued and finished
///
/// Status is read exactly once per job, so a job whose status changes while
/// the snapshot is taken still lands in exactly one bucket.
pub fn partition<'a, J, I, L>(jobs: I, limit_for: L) -> StatusSnapshot
where
    J: JobView + 'a + ?Sized,
    I: IntoIterator<Item = &'a J>,
    L: Fn(&str) -> usize,
{
    let mut snapshot = StatusSnapshot::default();
    let mut queues: BTreeMap<String, QueueMetrics> = BTreeMap::new();

    for job in jobs {
        let status = job.status();
        let metrics = queues
            .entry(job.queue().to_string())
            .or_insert_with(|| QueueMetrics {
                queue: job.queue().to_string(),
                running: 0,
                queued: 0,
                finished: 0,
                total: 0,
                limit: limit_for(job.queue()),
            });
        metrics.total += 1;

        match status {
            JobStatus::Running => {
                metrics.running += 1;
                snapshot.running.push(job.id().to_string());
            }
            JobStatus::Queued => {
                metrics.queued += 1;
                snapshot.queued.push(job.id().to_string());
            }
            JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled => {
                metrics.finished += 1;
                snapshot.finished.push(job.id().to_string());
            }
        }

        snapshot.jobs.push(JobSummary {
            id: job.id().to_string(),
            queue: job.queue().to_string(),
            task: job.task().to_string(),
            status,
        });
    }

    snapshot.queues = queues.into_values().collect();
    snapshot
}

/// Store of all known jobs
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<Job>>,
    id_map: DashMap<String, String>,
    sequence: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next submission sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a job, returning the shared handle
    pub fn register(&self, job: Job) -> Arc<Job> {
        let job = Arc::new(job);
        self.jobs.insert(job.id.clone(), job.clone());
        tracing::debug!(job_id = %job.id, queue = %job.queue, task = %job.task, "Job registered");
        job
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    /// Resolve a requested id to the id the job runs under
    ///
    /// A real job id always resolves to itself, even when the same string
    /// was later requested again and mapped elsewhere.
    pub fn resolve(&self, id: &str) -> String {
        if self.jobs.contains_key(id) {
            return id.to_string();
        }
        self.id_map
            .get(id)
            .map(|actual| actual.value().clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Correlate a client-requested id with the actual job id
    pub fn map_id(&self, requested: &str, actual: &str) {
        if requested != actual {
            self.id_map.insert(requested.to_string(), actual.to_string());
        }
    }

    pub fn clear_id_map(&self) {
        self.id_map.clear();
    }

    /// Look up a job by id or requested id
    pub fn get(&self, id: &str) -> WorkerResult<Arc<Job>> {
        let actual = self.resolve(id);
        self.jobs
            .get(&actual)
            .map(|job| job.value().clone())
            .ok_or_else(|| WorkerError::JobNotFound(id.to_string()))
    }

    /// All jobs in submission order
    pub fn list(&self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<_> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs
    }

    /// Move a job to a new status
    ///
    /// Returns false when the job exists but the transition is not allowed.
    pub fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> WorkerResult<bool> {
        let job = self.get(id)?;
        let applied = job.transition(status, error);
        if applied {
            tracing::debug!(job_id = %job.id, status = %status, "Job status updated");
        }
        Ok(applied)
    }

    /// Number of pooled jobs currently running in `queue`
    pub fn running_in(&self, queue: &str) -> usize {
        self.jobs
            .iter()
            .filter(|e| {
                let job = e.value();
                job.queue == queue && !job.child && job.status() == JobStatus::Running
            })
            .count()
    }

    /// Full record of a job with its children nested
    pub fn record(&self, id: &str) -> WorkerResult<JobRecord> {
        let job = self.get(id)?;
        Ok(self.record_of(&job, 0))
    }

    fn record_of(&self, job: &Job, depth: usize) -> JobRecord {
        let mut record = job.record();
        // Parent links are weak, but guard against a malformed chain anyway
        if depth < 32 {
            record.children = record
                .children_ids
                .iter()
                .filter_map(|child_id| self.jobs.get(child_id).map(|c| c.value().clone()))
                .map(|child| self.record_of(&child, depth + 1))
                .collect();
        }
        record
    }

    /// Classify every job exactly once
    pub fn status_snapshot<L>(&self, limit_for: L) -> StatusSnapshot
    where
        L: Fn(&str) -> usize,
    {
        let jobs = self.list();
        partition(jobs.iter().map(|job| job.as_ref()), limit_for)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
