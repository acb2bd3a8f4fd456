//! Middleware components for the control server
//!
//! - `require_token`: rejects requests without a valid control token

pub mod auth;

pub use auth::{require_token, AuthPolicy, CONTROL_TOKEN_HEADER};
