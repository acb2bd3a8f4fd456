//! Worker pool and job execution
//!
//! [`Daemon`] is the single service object behind the control server and
//! the scheduler. It owns the job registry, the queue admission controller,
//! the pool slots and the command table.
//!
//! Each queue is fed by one driver task that takes jobs in submission order,
//! waits for a queue permit and then a pool slot, and spawns the job's
//! execution task holding both. Killing a job aborts that task.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::admission::QueueAdmission;
use crate::config::WorkerConfig;
use crate::context::JobContext;
use crate::dispatcher::CommandTable;
use crate::error::{WorkerError, WorkerResult};
use crate::job::{normalize_queue, EnvFlags, Job, JobRecord, JobStatus, CANCELLED_ERROR};
use crate::notifications::{
    merge_notifications, EmailDigest, Mailer, NotificationBuffer, TracingMailer, JOB_LOG_TARGET,
};
use crate::registry::{JobRegistry, StatusSnapshot};

/// Client name used when a submission does not identify itself
pub const DEFAULT_CLIENT: &str = "local";

/// Id accepted by `kill` to cancel every job
pub const KILL_ALL: &str = "all";

/// Submission options for [`Daemon::enqueue`]
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub queue: Option<String>,
    pub client: Option<String>,
    /// Id the caller would like the job to have
    pub requested_id: Option<String>,
    pub task: Option<String>,
    /// Run inline on the caller's execution unit when the pool has one slot
    pub child: bool,
    pub capture_output: bool,
    pub env_flags: EnvFlags,
    /// Concurrency limit to register for the queue on first use
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    /// Share the parent's notification buffer instead of a fresh one
    pub inherit_notifications: bool,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn requested_id(mut self, id: impl Into<String>) -> Self {
        self.requested_id = Some(id.into());
        self
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn child(mut self, child: bool) -> Self {
        self.child = child;
        self
    }

    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    pub fn env_flags(mut self, env_flags: EnvFlags) -> Self {
        self.env_flags = env_flags;
        self
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn inherit_notifications(mut self, inherit: bool) -> Self {
        self.inherit_notifications = inherit;
        self
    }
}

struct DaemonInner {
    config: WorkerConfig,
    registry: JobRegistry,
    admission: QueueAdmission,
    slots: Arc<Semaphore>,
    commands: CommandTable,
    mailer: Arc<dyn Mailer>,
    lanes: DashMap<String, mpsc::UnboundedSender<Arc<Job>>>,
    shutdown: CancellationToken,
}

/// Job engine handle, cheap to clone
#[derive(Clone)]
pub struct Daemon {
    inner: Arc<DaemonInner>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("pool_size", &self.inner.config.pool_size)
            .field("jobs", &self.inner.registry.len())
            .field("commands", &self.inner.commands)
            .finish()
    }
}

impl Daemon {
    /// Create a daemon that logs email digests instead of sending them
    pub fn new(config: WorkerConfig, commands: CommandTable) -> Self {
        Self::with_mailer(config, commands, Arc::new(TracingMailer))
    }

    pub fn with_mailer(
        config: WorkerConfig,
        commands: CommandTable,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let pool_size = config.pool_size.max(1);
        let admission = QueueAdmission::new();
        for (queue, limit) in &config.queue_limits {
            admission.register_queue_limit(&normalize_queue(Some(queue)), *limit);
        }

        tracing::info!(
            pool_size = pool_size,
            commands = commands.len(),
            queue_limits = ?config.queue_limits,
            "Job engine initialized"
        );

        Self {
            inner: Arc::new(DaemonInner {
                slots: Arc::new(Semaphore::new(pool_size)),
                config,
                registry: JobRegistry::new(),
                admission,
                commands,
                mailer,
                lanes: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    pub fn admission(&self) -> &QueueAdmission {
        &self.inner.admission
    }

    pub fn commands(&self) -> &CommandTable {
        &self.inner.commands
    }

    pub fn pool_size(&self) -> usize {
        self.inner.config.pool_size.max(1)
    }

    /// Token cancelled once the daemon shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // ========== Submission ==========

    /// Submit a root job
    pub async fn enqueue(&self, args: Vec<String>, opts: EnqueueOptions) -> WorkerResult<Arc<Job>> {
        self.submit(args, opts, None).await
    }

    /// Submit a job, optionally on behalf of a running job
    ///
    /// With a caller the new job becomes its child: it inherits the caller's
    /// client, execution flags and locals. A child submitted with `child` set
    /// while the pool has a single slot runs inline on the caller's
    /// execution unit before this returns; everything else is queued.
    pub async fn submit(
        &self,
        args: Vec<String>,
        opts: EnqueueOptions,
        caller: Option<&mut JobContext>,
    ) -> WorkerResult<Arc<Job>> {
        if self.is_shutting_down() {
            return Err(WorkerError::Internal("daemon is shutting down".to_string()));
        }
        self.inner.commands.resolve(&args)?;

        let queue = normalize_queue(opts.queue.as_deref());
        if let Some(limit) = opts.concurrency {
            self.inner.admission.register_queue_limit(&queue, limit);
        }

        let (client, env_flags, parent, locals) = match caller.as_deref() {
            Some(ctx) => (
                ctx.client().to_string(),
                ctx.env().merged(&opts.env_flags),
                Some(ctx.job().clone()),
                ctx.locals().clone(),
            ),
            None => (
                opts.client
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_CLIENT.to_string()),
                opts.env_flags.clone(),
                None,
                BTreeMap::new(),
            ),
        };

        let registry = &self.inner.registry;
        let id = match opts.requested_id.as_deref().map(str::trim) {
            Some(requested) if !requested.is_empty() && !registry.contains(requested) => {
                requested.to_string()
            }
            _ => uuid::Uuid::new_v4().to_string(),
        };
        if let Some(requested) = opts.requested_id.as_deref().map(str::trim) {
            if !requested.is_empty() {
                registry.map_id(requested, &id);
            }
        }

        let inline = opts.child && parent.is_some() && self.pool_size() == 1;

        let mut job = Job::new(id, queue, args, client)
            .inline(inline)
            .capturing(opts.capture_output)
            .with_env(env_flags)
            .with_max_retries(opts.max_retries.unwrap_or(self.inner.config.max_retries))
            .with_seed_locals(locals)
            .inheriting_notifications(opts.inherit_notifications)
            .with_sequence(registry.next_sequence());
        if let Some(task) = opts.task {
            job = job.with_task(task);
        }
        if let Some(parent) = &parent {
            job = job.with_parent(parent.id.clone());
        }

        let job = registry.register(job);
        if let Some(parent) = &parent {
            parent.add_child(&job.id);
        }

        tracing::info!(
            job_id = %job.id,
            queue = %job.queue,
            client = %job.client,
            task = %job.task,
            parent_id = ?job.parent_id,
            inline = inline,
            "Job enqueued"
        );

        match caller {
            Some(ctx) if inline => self.run_inline(ctx, job.clone()).await,
            _ => self.dispatch_to_lane(job.clone()),
        }
        Ok(job)
    }

    fn dispatch_to_lane(&self, job: Arc<Job>) {
        let sender = self
            .inner
            .lanes
            .entry(job.queue.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(drive_lane(self.clone(), job.queue.clone(), rx));
                tx
            })
            .clone();

        // A job registered after shutdown began is missed by `kill_all`
        if sender.send(job.clone()).is_err() || self.is_shutting_down() {
            tracing::warn!(job_id = %job.id, queue = %job.queue, "Daemon shutting down, cancelling job");
            if let Some(Some(worker)) = job.cancel() {
                worker.abort();
            }
        }
    }

    // ========== Execution ==========

    async fn run_pooled(self, job: Arc<Job>) {
        let mut ctx = JobContext::for_pooled(self.clone(), job.clone());
        tracing::debug!(job_id = %job.id, queue = %job.queue, "Job started");
        let result = self.execute(&mut ctx, &job).await;
        self.complete(&job, result).await;
    }

    fn run_inline<'a>(&'a self, ctx: &'a mut JobContext, job: Arc<Job>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if !job.transition(JobStatus::Running, None) {
                return;
            }
            tracing::debug!(job_id = %job.id, parent_id = ?job.parent_id, "Inline job started");

            let snapshot = ctx.enter_inline(job.clone());
            let result = tokio::select! {
                result = self.execute(ctx, &job) => result,
                _ = job.wait_terminal() => Err(WorkerError::Cancelled(CANCELLED_ERROR.to_string())),
            };
            ctx.restore(snapshot);

            self.complete(&job, result).await;
        })
    }

    /// Run the job's command, retrying failed attempts
    async fn execute(&self, ctx: &mut JobContext, job: &Job) -> WorkerResult<()> {
        loop {
            let attempt = job.record_attempt();
            let outcome = AssertUnwindSafe(self.inner.commands.dispatch(ctx, &job.args))
                .catch_unwind()
                .await;

            let result = match outcome {
                Ok(result) => result,
                Err(panic) => Err(WorkerError::failed(format!(
                    "command panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt <= job.max_retries => {
                    tracing::warn!(
                        job_id = %job.id,
                        attempt = attempt,
                        max_retries = job.max_retries,
                        error = %err,
                        "Job attempt failed, retrying"
                    );
                    tokio::time::sleep(self.inner.config.retry_delay()).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Settle notifications and record the final status
    async fn complete(&self, job: &Arc<Job>, result: WorkerResult<()>) {
        if job.status().is_terminal() {
            return;
        }
        self.settle(job).await;

        let (status, error) = match result {
            Ok(()) => (JobStatus::Finished, None),
            Err(WorkerError::Cancelled(_)) => {
                (JobStatus::Cancelled, Some(CANCELLED_ERROR.to_string()))
            }
            Err(err) => {
                err.log();
                (JobStatus::Failed, Some(err.to_string()))
            }
        };

        if job.transition(status, error) {
            tracing::info!(
                job_id = %job.id,
                queue = %job.queue,
                status = %status,
                attempts = job.attempts(),
                "Job completed"
            );
        }
    }

    /// Hand the job's notifications to its parent, or deliver them
    async fn settle(&self, job: &Arc<Job>) {
        let contents = job.notifications.lock().close();
        if let Some(leftover) = self.merge_into_parent(job, contents) {
            self.deliver(job, leftover).await;
        }
    }

    /// Returns the contents back when there is no open parent buffer
    fn merge_into_parent(
        &self,
        job: &Job,
        mut contents: NotificationBuffer,
    ) -> Option<NotificationBuffer> {
        let parent = job
            .parent_id
            .as_deref()
            .and_then(|id| self.inner.registry.get(id).ok())?;

        let mut parent_buffer = parent.notifications.lock();
        if parent_buffer.is_closed() {
            drop(parent_buffer);
            return Some(contents);
        }
        merge_notifications(&mut contents, &mut parent_buffer);
        None
    }

    async fn deliver(&self, job: &Job, contents: NotificationBuffer) {
        for line in &contents.log {
            tracing::info!(target: JOB_LOG_TARGET, job_id = %job.id, client = %job.client, "{}", line);
            if job.capture_output {
                job.append_output(line.as_str());
            }
        }

        if !contents.send_email || contents.email.is_empty() {
            return;
        }
        if job.env_flags.no_email {
            tracing::debug!(job_id = %job.id, "Email suppressed by no_email flag");
            return;
        }

        let digest = EmailDigest {
            job_id: job.id.clone(),
            task: job.task.clone(),
            client: job.client.clone(),
            lines: contents.email,
        };
        if let Err(err) = self.inner.mailer.deliver(digest).await {
            err.log();
        }
    }

    // ========== Cancellation ==========

    /// Cancel a job, or every job with `"all"`
    ///
    /// Returns how many jobs were cancelled. Unknown ids are logged and
    /// yield zero.
    pub async fn kill(&self, id: &str) -> usize {
        if id == KILL_ALL {
            return self.kill_all().await;
        }
        match self.inner.registry.get(id) {
            Ok(job) => usize::from(self.cancel_job(&job).await),
            Err(_) => {
                tracing::warn!(job_id = %id, "Kill requested for unknown job");
                0
            }
        }
    }

    /// Cancel every job that has not finished and forget requested ids
    pub async fn kill_all(&self) -> usize {
        let mut cancelled = 0;
        for job in self.inner.registry.list() {
            if !job.status().is_terminal() && self.cancel_job(&job).await {
                cancelled += 1;
            }
        }
        self.inner.registry.clear_id_map();
        tracing::info!(cancelled = cancelled, "All jobs killed");
        cancelled
    }

    async fn cancel_job(&self, job: &Arc<Job>) -> bool {
        let Some(worker) = job.cancel() else {
            return false;
        };

        if let Some(handle) = worker {
            handle.abort();
            if tokio::time::timeout(self.inner.config.kill_grace(), handle)
                .await
                .is_err()
            {
                tracing::warn!(job_id = %job.id, "Job execution unit still alive after kill grace period");
            }
        }

        for child in self.inline_descendants(job) {
            if child.cancel().is_some() {
                self.settle(&child).await;
            }
        }
        self.settle(job).await;

        tracing::info!(job_id = %job.id, queue = %job.queue, "Job cancelled");
        true
    }

    /// Inline children ride on their parent's execution unit
    fn inline_descendants(&self, job: &Job) -> Vec<Arc<Job>> {
        let mut found = Vec::new();
        let mut pending = job.children_ids();
        while let Some(id) = pending.pop() {
            if let Ok(child) = self.inner.registry.get(&id) {
                if child.child {
                    pending.extend(child.children_ids());
                    found.push(child);
                }
            }
        }
        found
    }

    // ========== Queries ==========

    /// Wait for a job to reach a terminal state and return its record
    pub async fn wait(&self, id: &str) -> WorkerResult<JobRecord> {
        let job = self.inner.registry.get(id)?;
        job.wait_terminal().await;
        self.inner.registry.record(&job.id)
    }

    pub fn job_record(&self, id: &str) -> WorkerResult<JobRecord> {
        self.inner.registry.record(id)
    }

    /// Check whether `queue` is at its concurrency ceiling
    pub fn queue_busy(&self, queue: &str) -> bool {
        let queue = normalize_queue(Some(queue));
        self.inner.registry.running_in(&queue) >= self.inner.admission.limit_or_default(&queue)
    }

    pub fn register_queue_limit(&self, queue: &str, limit: usize) -> usize {
        self.inner
            .admission
            .register_queue_limit(&normalize_queue(Some(queue)), limit)
    }

    pub fn queue_limit(&self, queue: &str) -> Option<usize> {
        self.inner.admission.queue_limit(&normalize_queue(Some(queue)))
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        let admission = &self.inner.admission;
        self.inner
            .registry
            .status_snapshot(|queue| admission.limit_or_default(queue))
    }

    /// Stop accepting jobs, stop the queue drivers and cancel all jobs
    pub async fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();
        let cancelled = self.kill_all().await;
        tracing::info!(cancelled = cancelled, "Job engine shut down");
        cancelled
    }
}

/// Admit a queue's jobs in submission order
async fn drive_lane(daemon: Daemon, queue: String, mut rx: mpsc::UnboundedReceiver<Arc<Job>>) {
    let shutdown = daemon.shutdown_token();
    let slots = daemon.inner.slots.clone();
    tracing::debug!(queue = %queue, "Queue driver started");

    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(job) => job,
                None => break,
            },
        };
        if job.status().is_terminal() {
            continue;
        }

        let queue_permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = job.wait_terminal() => continue,
            permit = daemon.inner.admission.acquire(&queue) => match permit {
                Ok(permit) => permit,
                Err(err) => {
                    err.log();
                    break;
                }
            },
        };

        let slot = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = job.wait_terminal() => continue,
            slot = slots.clone().acquire_owned() => match slot {
                Ok(slot) => slot,
                Err(_) => break,
            },
        };

        let runner = daemon.clone();
        let running = job.clone();
        job.start_with(move || {
            tokio::spawn(async move {
                let _permits = (queue_permit, slot);
                runner.run_pooled(running).await;
            })
        });
    }

    tracing::debug!(queue = %queue, "Queue driver stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
