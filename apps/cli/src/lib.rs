//! Remote command-line client for the librarian daemon
//!
//! Talks to the daemon's control server over HTTP. Server error bodies are
//! surfaced verbatim through [`ClientError::Http`].

pub mod client;
pub mod commands;
pub mod error;
pub mod exit_error;
pub mod models;
pub mod output;

pub use client::ControlClient;
pub use commands::{run, Cli};
pub use error::{ClientError, ClientResult};
pub use exit_error::ExitError;
