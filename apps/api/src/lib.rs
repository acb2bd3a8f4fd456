//! Librarian control server library
//!
//! This module exposes the control server components for use in integration
//! tests and by the daemon binary.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod services;
pub mod state;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use middleware::AuthPolicy;
pub use routes::build_router;
pub use server::{check_bind_policy, ControlServer};
pub use state::AppState;
