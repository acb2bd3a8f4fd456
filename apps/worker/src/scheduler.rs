//! Periodic scheduler
//!
//! Walks the periodic entries of the configured templates and enqueues each
//! one whose interval has elapsed since it last fired. The due check and
//! the last-run update happen in one map entry operation, so two templates
//! sharing a task key cannot both fire it in the same tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerResult;
use crate::job::Job;
use crate::pool::{Daemon, EnqueueOptions};
use crate::template::TemplateStore;

/// Client name recorded on scheduled jobs
pub const SCHEDULER_CLIENT: &str = "scheduler";

/// Enqueues periodic template entries when they come due
#[derive(Debug)]
pub struct PeriodicScheduler {
    daemon: Daemon,
    templates: Arc<TemplateStore>,
    schedules: Vec<String>,
    last_run: DashMap<String, DateTime<Utc>>,
}

impl PeriodicScheduler {
    pub fn new(daemon: Daemon, templates: Arc<TemplateStore>, schedules: Vec<String>) -> Self {
        Self {
            daemon,
            templates,
            schedules,
            last_run: DashMap::new(),
        }
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.templates
    }

    /// Template names walked on every tick
    pub fn schedules(&self) -> &[String] {
        &self.schedules
    }

    /// When `task` last fired
    pub fn last_run(&self, task: &str) -> Option<DateTime<Utc>> {
        self.last_run.get(task).map(|at| *at.value())
    }

    /// Check whether `task` is due at `now` and, if so, mark it as run
    fn claim(&self, task: &str, interval_secs: u64, now: DateTime<Utc>) -> bool {
        if interval_secs == 0 {
            return false;
        }
        match self.last_run.entry(task.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                let elapsed = now.signed_duration_since(*slot.get()).num_seconds();
                if elapsed >= 0 && elapsed as u64 >= interval_secs {
                    slot.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Enqueue every due entry of `template` as of now
    pub async fn schedule(&self, template: &str) -> WorkerResult<Vec<Arc<Job>>> {
        self.schedule_at(template, Utc::now()).await
    }

    /// Enqueue every entry of `template` that is due at `now`
    pub async fn schedule_at(
        &self,
        template: &str,
        now: DateTime<Utc>,
    ) -> WorkerResult<Vec<Arc<Job>>> {
        let entries = self.templates.periodic_entries(template)?;
        let mut enqueued = Vec::new();

        for (task, entry) in entries {
            let interval = entry.interval_secs();
            if interval == 0 {
                tracing::debug!(task = %task, every = %entry.every, "Periodic entry has no usable interval");
                continue;
            }
            if !self.claim(&task, interval, now) {
                continue;
            }

            let mut opts = EnqueueOptions::new()
                .client(SCHEDULER_CLIENT)
                .task(task.clone());
            if let Some(queue) = &entry.queue {
                opts = opts.queue(queue.clone());
            }
            if let Some(limit) = entry.concurrency {
                opts = opts.concurrency(limit);
            }

            match self.daemon.enqueue(entry.to_args(), opts).await {
                Ok(job) => {
                    tracing::info!(
                        task = %task,
                        template = %template,
                        job_id = %job.id,
                        "Periodic task enqueued"
                    );
                    enqueued.push(job);
                }
                Err(err) => {
                    tracing::warn!(task = %task, template = %template, error = %err, "Periodic task rejected");
                }
            }
        }

        Ok(enqueued)
    }

    /// Run `schedule` for every configured template
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut enqueued = 0;
        for template in &self.schedules {
            match self.schedule_at(template, now).await {
                Ok(jobs) => enqueued += jobs.len(),
                Err(err) => err.log(),
            }
        }
        enqueued
    }

    /// Tick every `period` until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            period_secs = period.as_secs(),
            schedules = ?self.schedules,
            "Periodic scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let enqueued = self.tick(Utc::now()).await;
                    if enqueued > 0 {
                        tracing::debug!(enqueued = enqueued, "Scheduler tick");
                    }
                }
            }
        }

        tracing::info!("Periodic scheduler stopped");
    }
}
