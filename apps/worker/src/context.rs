//! Execution context handed to every command
//!
//! A [`JobContext`] carries what a running command may read or change about
//! its surroundings: the requesting client, execution flags, locals seeded
//! from the parent, and where log and email lines go. Pooled jobs get a
//! context derived from their job record. Inline children borrow their
//! caller's context; it is captured before the child runs and restored
//! literally afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::WorkerResult;
use crate::job::{EnvFlags, Job};
use crate::notifications::{merge_notifications, NotificationBuffer, JOB_LOG_TARGET};
use crate::pool::{Daemon, EnqueueOptions};

/// Where log lines written by a command end up
#[derive(Debug, Clone)]
pub enum LogSink {
    /// Emitted immediately on the job log target
    Live,
    /// Held in a buffer until the job tree completes
    Deferred(Arc<Mutex<NotificationBuffer>>),
}

impl LogSink {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Everything [`JobContext::restore`] puts back
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    job: Arc<Job>,
    client: String,
    env: EnvFlags,
    locals: BTreeMap<String, Value>,
    sink: LogSink,
    notifications: Arc<Mutex<NotificationBuffer>>,
    captures: Vec<Arc<Job>>,
}

impl ContextSnapshot {
    pub fn locals(&self) -> &BTreeMap<String, Value> {
        &self.locals
    }
}

/// Execution-local state of the running command
pub struct JobContext {
    daemon: Daemon,
    job: Arc<Job>,
    client: String,
    env: EnvFlags,
    locals: BTreeMap<String, Value>,
    sink: LogSink,
    notifications: Arc<Mutex<NotificationBuffer>>,
    captures: Vec<Arc<Job>>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job.id)
            .field("client", &self.client)
            .field("env", &self.env)
            .field("locals", &self.locals)
            .field("live", &self.sink.is_live())
            .finish()
    }
}

impl JobContext {
    /// Context for a job running on its own pool slot
    pub fn for_pooled(daemon: Daemon, job: Arc<Job>) -> Self {
        let notifications = job
            .parent_id
            .as_deref()
            .filter(|_| job.inherit_notifications)
            .and_then(|parent_id| daemon.registry().get(parent_id).ok())
            .map(|parent| parent.notifications.clone())
            .unwrap_or_else(|| job.notifications.clone());

        let sink = if job.parent_id.is_some() {
            LogSink::Deferred(notifications.clone())
        } else {
            LogSink::Live
        };

        let captures = if job.capture_output {
            vec![job.clone()]
        } else {
            Vec::new()
        };

        Self {
            client: job.client.clone(),
            env: job.env_flags.clone(),
            locals: job.seed_locals.clone(),
            daemon,
            job,
            sink,
            notifications,
            captures,
        }
    }

    pub fn daemon(&self) -> &Daemon {
        &self.daemon
    }

    /// Job currently executing in this context
    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn env(&self) -> &EnvFlags {
        &self.env
    }

    pub fn is_pretend(&self) -> bool {
        self.env.pretend
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    // ========== Locals ==========

    pub fn locals(&self) -> &BTreeMap<String, Value> {
        &self.locals
    }

    pub fn get_local(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }

    pub fn set_local(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.locals.insert(key.into(), value)
    }

    pub fn remove_local(&mut self, key: &str) -> Option<Value> {
        self.locals.remove(key)
    }

    // ========== Output ==========

    /// Write a log line for the current job
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        match &self.sink {
            LogSink::Live => self.emit(&line),
            LogSink::Deferred(buffer) => self.write_to(buffer, |b| b.log.push(line)),
        }
    }

    /// Write a log line only when the debug flag is set
    pub fn debug(&self, line: impl Into<String>) {
        if self.env.debug {
            self.log(line);
        }
    }

    fn emit(&self, line: &str) {
        tracing::info!(
            target: JOB_LOG_TARGET,
            job_id = %self.job.id,
            client = %self.client,
            "{}",
            line
        );
        for job in &self.captures {
            job.append_output(line);
        }
    }

    /// Append a line to the pending email
    pub fn email(&self, line: impl Into<String>) {
        let line = line.into();
        self.write_to(&self.notifications, |b| b.email.push(line));
    }

    /// Ask for the pending email to be sent when the job tree completes
    pub fn request_email(&self) {
        self.write_to(&self.notifications, |b| b.send_email = true);
    }

    /// Write into `buffer`, or into the job's own buffer once it is closed
    ///
    /// A buffer shared with a parent closes when the parent completes; the
    /// job then keeps its notifications and delivers them itself.
    fn write_to(
        &self,
        buffer: &Mutex<NotificationBuffer>,
        write: impl FnOnce(&mut NotificationBuffer),
    ) {
        let mut shared = buffer.lock();
        if !shared.is_closed() {
            write(&mut shared);
            return;
        }
        drop(shared);
        write(&mut self.job.notifications.lock());
    }

    /// Copy of the notifications gathered so far
    pub fn pending_notifications(&self) -> NotificationBuffer {
        self.notifications.lock().clone()
    }

    // ========== Children ==========

    /// Submit a child job on behalf of the current job
    ///
    /// The child inherits the client, execution flags and locals of this
    /// context. With `child` set on a single-slot pool it runs to completion
    /// before this returns.
    pub async fn enqueue(
        &mut self,
        args: Vec<String>,
        opts: EnqueueOptions,
    ) -> WorkerResult<Arc<Job>> {
        let daemon = self.daemon.clone();
        daemon.submit(args, opts, Some(self)).await
    }

    /// Wait for every direct child, then merge their notifications here
    pub async fn consolidate_children(&mut self) -> WorkerResult<()> {
        let registry = self.daemon.registry();
        let children: Vec<Arc<Job>> = self
            .job
            .children_ids()
            .iter()
            .map(|id| registry.get(id))
            .collect::<WorkerResult<_>>()?;

        for child in &children {
            child.wait_terminal().await;
        }

        for child in &children {
            if Arc::ptr_eq(&child.notifications, &self.notifications) {
                continue;
            }
            let mut contents = child.notifications.lock().drain();
            merge_notifications(&mut contents, &mut self.notifications.lock());
        }

        if self.sink.is_live() {
            self.flush_deferred();
        }
        Ok(())
    }

    /// Emit buffered log lines through the live channel
    fn flush_deferred(&self) {
        let lines = std::mem::take(&mut self.notifications.lock().log);
        for line in &lines {
            self.emit(line);
        }
    }

    // ========== Capture / restore ==========

    /// Capture the context exactly as it is now
    pub fn capture(&self) -> ContextSnapshot {
        ContextSnapshot {
            job: self.job.clone(),
            client: self.client.clone(),
            env: self.env.clone(),
            locals: self.locals.clone(),
            sink: self.sink.clone(),
            notifications: self.notifications.clone(),
            captures: self.captures.clone(),
        }
    }

    /// Put back a captured context, discarding anything changed since
    pub fn restore(&mut self, snapshot: ContextSnapshot) {
        self.job = snapshot.job;
        self.client = snapshot.client;
        self.env = snapshot.env;
        self.locals = snapshot.locals;
        self.sink = snapshot.sink;
        self.notifications = snapshot.notifications;
        self.captures = snapshot.captures;
    }

    /// Switch to an inline child, returning the caller's context
    ///
    /// The child keeps the caller's client, locals and output channel.
    pub(crate) fn enter_inline(&mut self, child: Arc<Job>) -> ContextSnapshot {
        let snapshot = self.capture();
        self.env = child.env_flags.clone();
        if child.capture_output {
            self.captures.push(child.clone());
        }
        self.job = child;
        snapshot
    }
}
