//! Watchlist HTTP route handlers
//!
//! Thin mapping onto the [`WatchlistStore`](crate::services::WatchlistStore).
//! Every write must carry an IMDb id; anything else is a 422.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::routes::jobs::json_body;
use crate::services::watchlist::validate_imdb_id;
use crate::services::{NewWatchlistEntry, WatchlistEntry};
use crate::state::AppState;

/// Create watchlist router
pub fn watchlist_router() -> Router<AppState> {
    Router::new()
        .route("/watchlist", get(list).post(add))
        .route("/watchlist/:imdb_id", get(show).delete(remove))
}

async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<WatchlistEntry>>> {
    Ok(Json(state.watchlist.list().await?))
}

async fn show(
    State(state): State<AppState>,
    Path(imdb_id): Path<String>,
) -> ApiResult<Json<WatchlistEntry>> {
    state
        .watchlist
        .get(&imdb_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("watchlist entry", imdb_id))
}

/// Add or update an entry
///
/// # Response
/// - 200 OK with the stored entry
/// - 422 Unprocessable Entity when `imdb_id` is missing or malformed
async fn add(
    State(state): State<AppState>,
    body: Result<Json<NewWatchlistEntry>, JsonRejection>,
) -> ApiResult<Json<WatchlistEntry>> {
    let entry = json_body(body)?.into_entry(Utc::now())?;
    let stored = state.watchlist.upsert(entry).await?;
    tracing::info!(imdb_id = %stored.imdb_id, "Watchlist entry saved");
    Ok(Json(stored))
}

async fn remove(
    State(state): State<AppState>,
    Path(imdb_id): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let imdb_id = validate_imdb_id(Some(&imdb_id))?;
    if !state.watchlist.remove(&imdb_id).await? {
        return Err(ApiError::not_found("watchlist entry", imdb_id));
    }
    tracing::info!(imdb_id = %imdb_id, "Watchlist entry removed");
    Ok((StatusCode::OK, Json(json!({ "removed": imdb_id }))))
}
