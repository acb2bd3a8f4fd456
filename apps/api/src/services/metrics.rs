//! Process resource metrics for the status endpoint

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Resource usage of the daemon process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    /// Seconds since the control server started
    pub uptime_secs: u64,
    /// CPU usage since the previous sample, in percent of one core
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_usage_percent: Option<f32>,
    /// CPU time consumed since the control server started, in seconds
    ///
    /// Accumulated from the usage reported at each sample, so it is an
    /// estimate whose accuracy depends on how often status is polled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_time_secs: Option<f64>,
    /// Resident memory in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Samples the current process through sysinfo
///
/// The `System` handle is kept between samples; CPU usage is computed from
/// the difference to the previous refresh, so the first sample reads 0.
pub struct MetricsService {
    started: Instant,
    system: Mutex<Sampler>,
}

struct Sampler {
    system: System,
    last_sample: Instant,
    cpu_time_secs: f64,
}

/// Add the CPU time implied by `usage_percent` over `elapsed`
pub fn accumulate_cpu_time(total_secs: f64, usage_percent: f32, elapsed: Duration) -> f64 {
    total_secs + f64::from(usage_percent.max(0.0)) / 100.0 * elapsed.as_secs_f64()
}

impl std::fmt::Debug for MetricsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsService")
            .field("uptime_secs", &self.started.elapsed().as_secs())
            .finish()
    }
}

impl MetricsService {
    pub fn new() -> Self {
        let started = Instant::now();
        Self {
            started,
            system: Mutex::new(Sampler {
                system: System::new(),
                last_sample: started,
                cpu_time_secs: 0.0,
            }),
        }
    }

    pub fn collect(&self) -> ProcessMetrics {
        let mut metrics = ProcessMetrics {
            uptime_secs: self.started.elapsed().as_secs(),
            cpu_usage_percent: None,
            cpu_time_secs: None,
            memory_bytes: None,
            pid: None,
        };

        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(reason) => {
                tracing::debug!(reason = %reason, "Process metrics unavailable");
                return metrics;
            }
        };

        let mut sampler = self.system.lock();
        if !sampler.system.refresh_process(pid) {
            return metrics;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(sampler.last_sample);
        let Some((process_pid, memory, usage)) = sampler
            .system
            .process(pid)
            .map(|p| (p.pid().as_u32(), p.memory(), p.cpu_usage()))
        else {
            return metrics;
        };

        sampler.cpu_time_secs = accumulate_cpu_time(sampler.cpu_time_secs, usage, elapsed);
        sampler.last_sample = now;

        metrics.pid = Some(process_pid);
        metrics.memory_bytes = Some(memory);
        metrics.cpu_usage_percent = Some(usage);
        metrics.cpu_time_secs = Some(sampler.cpu_time_secs);
        metrics
    }
}

impl Default for MetricsService {
    fn default() -> Self {
        Self::new()
    }
}
