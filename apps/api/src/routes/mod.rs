//! HTTP route handlers for the control server
//!
//! This module contains all REST endpoint handlers including:
//! - Health probes (no token required)
//! - Job submission, status, lookup and cancellation
//! - Daemon reload and stop
//! - Watchlist passthrough

pub mod daemon;
pub mod health;
pub mod jobs;
pub mod watchlist;

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::middleware::require_token;
use crate::state::AppState;

pub use daemon::daemon_router;
pub use health::health_router;
pub use jobs::jobs_router;
pub use watchlist::watchlist_router;

/// Assemble the full control router
///
/// Health probes are merged outside the token layer.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(jobs_router())
        .merge(daemon_router())
        .merge(watchlist_router())
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_token,
        ))
        .with_state(state);

    Router::new()
        .nest("/health", health_router())
        .merge(protected)
        .layer(TraceLayer::new_for_http())
}
