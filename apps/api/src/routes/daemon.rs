//! Daemon control HTTP route handlers
//!
//! - `POST /reload` - Drop cached templates and re-read the scheduled ones
//! - `POST /stop` - Cancel every job and shut the control server down

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Create daemon control router
pub fn daemon_router() -> Router<AppState> {
    Router::new()
        .route("/reload", post(reload))
        .route("/stop", post(stop))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateProblem {
    pub template: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    /// Cached templates dropped
    pub dropped: usize,
    /// Scheduled templates that loaded cleanly
    pub loaded: Vec<String>,
    pub errors: Vec<TemplateProblem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    /// Jobs cancelled on the way down
    pub cancelled: usize,
    pub stopping: bool,
}

async fn reload(State(state): State<AppState>) -> Json<ReloadResponse> {
    let templates = state.scheduler.templates();
    let dropped = templates.reload();

    let mut loaded = Vec::new();
    let mut errors = Vec::new();
    for name in state.scheduler.schedules() {
        match templates.periodic_entries(name) {
            Ok(_) => loaded.push(name.clone()),
            Err(err) => {
                err.log();
                errors.push(TemplateProblem {
                    template: name.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    tracing::info!(
        dropped = dropped,
        loaded = loaded.len(),
        errors = errors.len(),
        "Templates reloaded"
    );
    Json(ReloadResponse {
        dropped,
        loaded,
        errors,
    })
}

/// Cancel all jobs and stop serving
///
/// The daemon's shutdown token also drives the server's graceful shutdown
/// and the scheduler loop, so this response is the last one served.
async fn stop(State(state): State<AppState>) -> Json<StopResponse> {
    tracing::info!("Stop requested over the control server");
    let cancelled = state.daemon.shutdown().await;
    Json(StopResponse {
        cancelled,
        stopping: true,
    })
}
