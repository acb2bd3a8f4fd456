//! Human and JSON rendering of control server responses

use anyhow::Result;
use serde::Serialize;

use crate::models::{DaemonStatus, JobView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print `value` as JSON, or run `text` to print it for humans
pub fn format_or_json<T, F>(format: OutputFormat, value: &T, text: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(),
    }
    Ok(())
}

pub fn format_uptime(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    format!("{:.1} MiB", bytes as f64 / MIB)
}

pub fn status_lines(status: &DaemonStatus) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Status: {}",
            if status.shutting_down {
                "stopping"
            } else {
                "running"
            }
        ),
        format!("Uptime: {}", format_uptime(status.process.uptime_secs)),
    ];
    if let Some(memory) = status.process.memory_bytes {
        lines.push(format!("Memory: {}", format_bytes(memory)));
    }
    if let Some(cpu) = status.process.cpu_time_secs {
        lines.push(format!("CPU time: {:.1}s", cpu));
    }
    lines.push(format!(
        "Jobs: {} running, {} queued, {} finished (pool of {})",
        status.running.len(),
        status.queued.len(),
        status.finished.len(),
        status.pool_size
    ));
    for queue in &status.queues {
        lines.push(format!(
            "  {:<16} {}/{} running, {} queued",
            queue.queue, queue.running, queue.limit, queue.queued
        ));
    }
    lines
}

pub fn job_lines(job: &JobView) -> Vec<String> {
    let mut lines = vec![
        format!("Job {}: {}", job.id, job.status),
        format!("  task:   {}", job.task),
        format!("  queue:  {}", job.queue),
        format!("  client: {}", job.client),
    ];
    if let Some(parent) = &job.parent_id {
        lines.push(format!("  parent: {}", parent));
    }
    if !job.children_ids.is_empty() {
        lines.push(format!("  children: {}", job.children_ids.join(", ")));
    }
    if let Some(error) = &job.error {
        lines.push(format!("  error:  {}", error));
    }
    if let Some(output) = job.output.as_deref().filter(|o| !o.is_empty()) {
        lines.push(String::new());
        lines.extend(output.lines().map(str::to_string));
    }
    lines
}
