//! Job control HTTP route handlers
//!
//! - `POST /enqueue` - Submit a command, optionally waiting for it
//! - `GET /status` - Registry snapshot plus process metrics
//! - `GET /jobs/:id` - One job record, children included
//! - `POST /kill` - Cancel a job, or every job with `"all"`

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use librarian_worker::pool::KILL_ALL;
use librarian_worker::{EnqueueOptions, EnvFlags, JobRecord, StatusSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::services::ProcessMetrics;
use crate::state::AppState;

/// Create job control router
pub fn jobs_router() -> Router<AppState> {
    Router::new()
        .route("/enqueue", post(enqueue))
        .route("/status", get(status))
        .route("/jobs/:id", get(job))
        .route("/kill", post(kill))
}

/// Body of `POST /enqueue`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnqueueRequest {
    /// Command words followed by their arguments
    pub args: Vec<Value>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    /// Block until the job is finished, failed or cancelled
    #[serde(default)]
    pub wait: bool,
    /// Requested job id
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub capture_output: bool,
    #[serde(default)]
    pub env: EnvFlags,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl EnqueueRequest {
    /// Argument vector with non-string values rendered as JSON
    pub fn args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }

    fn options(&self) -> EnqueueOptions {
        let mut opts = EnqueueOptions::new()
            .capture_output(self.capture_output || self.wait)
            .env_flags(self.env.clone());
        if let Some(queue) = &self.queue {
            opts = opts.queue(queue.clone());
        }
        if let Some(client) = &self.client {
            opts = opts.client(client.clone());
        }
        if let Some(id) = &self.id {
            opts = opts.requested_id(id.clone());
        }
        if let Some(task) = &self.task {
            opts = opts.task(task.clone());
        }
        if let Some(limit) = self.concurrency {
            opts = opts.concurrency(limit);
        }
        if let Some(retries) = self.max_retries {
            opts = opts.max_retries(retries);
        }
        opts
    }
}

/// Body of `POST /kill`
#[derive(Debug, Clone, Deserialize)]
pub struct KillRequest {
    #[serde(alias = "jid")]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillResponse {
    pub id: String,
    /// Number of jobs cancelled by this request
    pub killed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
    pub total: usize,
    pub pool_size: usize,
    pub shutting_down: bool,
    pub process: ProcessMetrics,
}

/// Map axum's plain-text body rejections onto the JSON error envelope
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::InvalidBody(rejection.body_text()))
}

/// Submit a command
///
/// # Response
/// - 200 OK with the job record (terminal when `wait` is set)
/// - 422 Unprocessable Entity for unknown commands or malformed arguments
async fn enqueue(
    State(state): State<AppState>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> ApiResult<Json<JobRecord>> {
    let request = json_body(body)?;
    if state.daemon.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }

    let job = state
        .daemon
        .enqueue(request.args(), request.options())
        .await?;

    let record = if request.wait {
        state.daemon.wait(&job.id).await?
    } else {
        state.daemon.job_record(&job.id)?
    };
    Ok(Json(record))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.daemon.status_snapshot();
    Json(StatusResponse {
        total: snapshot.total(),
        snapshot,
        pool_size: state.daemon.pool_size(),
        shutting_down: state.daemon.is_shutting_down(),
        process: state.metrics.collect(),
    })
}

async fn job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<JobRecord>> {
    Ok(Json(state.daemon.job_record(&id)?))
}

/// Cancel a job
///
/// # Response
/// - 200 OK with the number of jobs cancelled (0 for jobs already done)
/// - 404 Not Found for ids the registry has never seen
async fn kill(
    State(state): State<AppState>,
    body: Result<Json<KillRequest>, JsonRejection>,
) -> ApiResult<Json<KillResponse>> {
    let KillRequest { id } = json_body(body)?;
    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(ApiError::ValidationError("id is required".to_string()));
    }

    let killed = state.daemon.kill(&id).await;
    if killed == 0 && id != KILL_ALL && state.daemon.job_record(&id).is_err() {
        return Err(ApiError::not_found("job", id));
    }
    Ok(Json(KillResponse { id, killed }))
}
