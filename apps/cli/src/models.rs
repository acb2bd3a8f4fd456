//! Request and response bodies of the control server, as the CLI reads them

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /enqueue`
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnqueueRequest {
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub wait: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// One job record
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobView {
    pub id: String,
    pub queue: String,
    pub status: String,
    pub task: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children_ids: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

impl JobView {
    pub fn is_success(&self) -> bool {
        self.status == "finished"
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "finished" | "failed" | "cancelled")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueView {
    pub queue: String,
    pub running: usize,
    pub queued: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProcessView {
    pub uptime_secs: u64,
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    #[serde(default)]
    pub cpu_usage_percent: Option<f32>,
    #[serde(default)]
    pub cpu_time_secs: Option<f64>,
    #[serde(default)]
    pub pid: Option<u32>,
}

/// Body of `GET /status`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonStatus {
    pub running: Vec<String>,
    pub queued: Vec<String>,
    pub finished: Vec<String>,
    #[serde(default)]
    pub queues: Vec<QueueView>,
    pub total: usize,
    pub pool_size: usize,
    #[serde(default)]
    pub shutting_down: bool,
    #[serde(default)]
    pub process: ProcessView,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KillSummary {
    pub id: String,
    pub killed: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StopSummary {
    pub cancelled: usize,
    pub stopping: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReloadSummary {
    pub dropped: usize,
    pub loaded: Vec<String>,
    #[serde(default)]
    pub errors: Vec<BTreeMap<String, Value>>,
}
