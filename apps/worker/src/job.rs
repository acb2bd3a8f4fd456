//! Job records and the job status state machine
//!
//! A [`Job`] is created by `Daemon::enqueue`, moves at most once through
//! `queued -> running -> {finished | failed | cancelled}` and stays in the
//! registry after completion so it can still be inspected.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::notifications::NotificationBuffer;

/// Queue used when a submission does not name one
pub const DEFAULT_QUEUE: &str = "default";

/// Error recorded on jobs stopped through `kill`
pub const CANCELLED_ERROR: &str = "Cancelled";

/// Normalize a queue name to lowercase alphanumerics and underscores
pub fn normalize_queue(name: Option<&str>) -> String {
    let raw = name
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_QUEUE);

    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a queue permit and a pool slot
    Queued,
    /// Currently executing
    Running,
    /// Command returned successfully
    Finished,
    /// Command returned an error
    Failed,
    /// Stopped through `kill`
    Cancelled,
}

impl JobStatus {
    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Finished | Self::Failed | Self::Cancelled => 2,
        }
    }

    /// Check whether moving to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Execution flags inherited by a job and its children
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvFlags {
    /// Verbose command output
    #[serde(default)]
    pub debug: bool,

    /// Dry run: commands must not change anything
    #[serde(default)]
    pub pretend: bool,

    /// Suppress email delivery for this job tree
    #[serde(default)]
    pub no_email: bool,

    /// Any other flag a command may consult
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EnvFlags {
    /// Combine inherited flags with per-submission overrides
    ///
    /// Boolean flags are sticky: a child can turn them on but never off.
    pub fn merged(&self, overrides: &EnvFlags) -> EnvFlags {
        let mut extra = self.extra.clone();
        extra.extend(overrides.extra.clone());
        EnvFlags {
            debug: self.debug || overrides.debug,
            pretend: self.pretend || overrides.pretend,
            no_email: self.no_email || overrides.no_email,
            extra,
        }
    }
}

/// Read-only view used by the status snapshot
///
/// `status()` is read exactly once per job by the snapshot algorithm.
pub trait JobView {
    fn id(&self) -> &str;
    fn queue(&self) -> &str;
    fn task(&self) -> &str;
    fn status(&self) -> JobStatus;
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    output: Vec<String>,
    children_ids: Vec<String>,
    attempts: u32,
    worker: Option<JoinHandle<()>>,
}

/// Unit of scheduled work
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub task: String,
    pub args: Vec<String>,
    pub client: String,
    pub parent_id: Option<String>,
    /// Runs inline on its parent's execution unit instead of a pool slot
    pub child: bool,
    pub capture_output: bool,
    pub env_flags: EnvFlags,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// Write notifications straight into the parent's buffer
    pub(crate) inherit_notifications: bool,
    /// Parent's execution-local values at submission time
    pub(crate) seed_locals: BTreeMap<String, serde_json::Value>,
    pub(crate) sequence: u64,
    pub(crate) notifications: Arc<Mutex<NotificationBuffer>>,
    state: Mutex<JobState>,
    status_tx: watch::Sender<JobStatus>,
}

impl Job {
    /// Create a queued job
    pub fn new(
        id: impl Into<String>,
        queue: impl Into<String>,
        args: Vec<String>,
        client: impl Into<String>,
    ) -> Self {
        let (status_tx, _) = watch::channel(JobStatus::Queued);
        let task = default_task(&args);
        Self {
            id: id.into(),
            queue: queue.into(),
            task,
            args,
            client: client.into(),
            parent_id: None,
            child: false,
            capture_output: false,
            env_flags: EnvFlags::default(),
            max_retries: 0,
            created_at: Utc::now(),
            inherit_notifications: false,
            seed_locals: BTreeMap::new(),
            sequence: 0,
            notifications: Arc::new(Mutex::new(NotificationBuffer::default())),
            state: Mutex::new(JobState {
                status: JobStatus::Queued,
                started_at: None,
                finished_at: None,
                error: None,
                output: Vec::new(),
                children_ids: Vec::new(),
                attempts: 0,
                worker: None,
            }),
            status_tx,
        }
    }

    /// Set a human readable task label
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    /// Link the job to the job that spawned it
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Mark the job as running inline on its parent's execution unit
    pub fn inline(mut self, inline: bool) -> Self {
        self.child = inline;
        self
    }

    /// Buffer output lines for later retrieval
    pub fn capturing(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Set inherited execution flags
    pub fn with_env(mut self, env_flags: EnvFlags) -> Self {
        self.env_flags = env_flags;
        self
    }

    /// Allow failed attempts to be retried
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub(crate) fn with_seed_locals(mut self, locals: BTreeMap<String, serde_json::Value>) -> Self {
        self.seed_locals = locals;
        self
    }

    pub(crate) fn inheriting_notifications(mut self, inherit: bool) -> Self {
        self.inherit_notifications = inherit;
        self
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Current status, read once under the state lock
    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().finished_at
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Captured output lines
    pub fn output(&self) -> Vec<String> {
        self.state.lock().output.clone()
    }

    pub fn children_ids(&self) -> Vec<String> {
        self.state.lock().children_ids.clone()
    }

    /// Check whether an execution unit is still attached to the job
    pub fn has_worker(&self) -> bool {
        self.state.lock().worker.is_some()
    }

    /// Move to `next` if the lifecycle allows it
    ///
    /// Returns false when the transition would move backwards or leave a
    /// terminal state; the job is left untouched in that case.
    pub fn transition(&self, next: JobStatus, error: Option<String>) -> bool {
        let mut state = self.state.lock();
        if !state.status.can_transition_to(next) {
            return false;
        }
        Self::apply(&mut state, next, error);
        drop(state);
        self.status_tx.send_replace(next);
        true
    }

    fn apply(state: &mut JobState, next: JobStatus, error: Option<String>) {
        let now = Utc::now();
        state.status = next;
        if next == JobStatus::Running {
            state.started_at = Some(now);
        }
        if next.is_terminal() {
            state.finished_at = Some(now);
            state.error = error;
            state.worker = None;
        }
    }

    /// Cancel the job, detaching its execution unit
    ///
    /// Returns `None` when the job had already reached a terminal state,
    /// otherwise the detached worker handle (if one was attached).
    pub(crate) fn cancel(&self) -> Option<Option<JoinHandle<()>>> {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return None;
        }
        let worker = state.worker.take();
        Self::apply(
            &mut state,
            JobStatus::Cancelled,
            Some(CANCELLED_ERROR.to_string()),
        );
        drop(state);
        self.status_tx.send_replace(JobStatus::Cancelled);
        Some(worker)
    }

    /// Mark the job running and attach the execution unit `spawn` creates
    ///
    /// Both happen under the state lock, so a concurrent `cancel` either sees
    /// the job still queued (and nothing is spawned) or sees the handle.
    pub(crate) fn start_with<F>(&self, spawn: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut state = self.state.lock();
        if !state.status.can_transition_to(JobStatus::Running) {
            return false;
        }
        Self::apply(&mut state, JobStatus::Running, None);
        state.worker = Some(spawn());
        drop(state);
        self.status_tx.send_replace(JobStatus::Running);
        true
    }

    pub(crate) fn record_attempt(&self) -> u32 {
        let mut state = self.state.lock();
        state.attempts += 1;
        state.attempts
    }

    pub(crate) fn append_output(&self, line: impl Into<String>) {
        self.state.lock().output.push(line.into());
    }

    pub(crate) fn add_child(&self, child_id: &str) {
        let mut state = self.state.lock();
        if !state.children_ids.iter().any(|id| id == child_id) {
            state.children_ids.push(child_id.to_string());
        }
    }

    /// Wait until the job reaches a terminal state
    pub async fn wait_terminal(&self) -> JobStatus {
        let mut rx = self.status_tx.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Serializable record of the job without nested children
    pub fn record(&self) -> JobRecord {
        let state = self.state.lock();
        JobRecord {
            id: self.id.clone(),
            queue: self.queue.clone(),
            status: state.status,
            task: self.task.clone(),
            args: self.args.clone(),
            client: self.client.clone(),
            parent_id: self.parent_id.clone(),
            children_ids: state.children_ids.clone(),
            children: Vec::new(),
            child: self.child,
            created_at: self.created_at,
            started_at: state.started_at,
            finished_at: state.finished_at,
            error: state.error.clone(),
            attempts: state.attempts,
            output: self
                .capture_output
                .then(|| state.output.join("\n")),
        }
    }
}

impl JobView for Job {
    fn id(&self) -> &str {
        &self.id
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    fn task(&self) -> &str {
        &self.task
    }

    fn status(&self) -> JobStatus {
        Job::status(self)
    }
}

/// Derive a task label from the command words
fn default_task(args: &[String]) -> String {
    let words: Vec<&str> = args.iter().take(2).map(String::as_str).collect();
    if words.is_empty() {
        "unnamed".to_string()
    } else {
        words.join(" ")
    }
}

/// Wire representation of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub queue: String,
    pub status: JobStatus,
    pub task: String,
    pub args: Vec<String>,
    pub client: String,
    pub parent_id: Option<String>,
    pub children_ids: Vec<String>,
    pub children: Vec<JobRecord>,
    pub child: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}
