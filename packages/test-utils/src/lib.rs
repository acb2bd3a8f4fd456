//! Shared test doubles for the librarian workspace
//!
//! These stand in for the command implementations and mail transport the
//! daemon talks to, so worker and API suites can drive real job trees
//! without any media tooling installed.
//!
//! - [`ScriptedCommand`] - runs a fixed list of [`Step`]s against the job context
//! - [`Probe`] / [`ProbeCommand`] - observes start, liveness and concurrency of a command
//! - [`RecordingMailer`] - keeps every email digest instead of sending it
//!
//! # Example
//!
//! ```rust,ignore
//! use librarian_test_utils::{daemon_with, ScriptedCommand, Step};
//!
//! #[tokio::test]
//! async fn test_with_script() {
//!     let table = CommandTable::new()
//!         .with("Test", "hello", ScriptedCommand::new(vec![Step::log("hello")]));
//!     let (daemon, mailer) = daemon_with(2, table);
//! }
//! ```

mod commands;
mod mailer;

pub use commands::{Invocation, Probe, ProbeCommand, ScriptedCommand, Step};
pub use mailer::RecordingMailer;

use std::sync::Arc;
use std::time::Duration;

use librarian_worker::{CommandTable, Daemon, WorkerConfig};

/// Build a daemon with `pool_size` slots and a recording mailer
///
/// Retries are off and the kill grace period is short.
pub fn daemon_with(pool_size: usize, commands: CommandTable) -> (Daemon, RecordingMailer) {
    let config = WorkerConfig {
        kill_grace_ms: 500,
        retry_delay_secs: 0,
        ..WorkerConfig::with_pool_size(pool_size)
    };
    let mailer = RecordingMailer::new();
    let daemon = Daemon::with_mailer(config, commands, Arc::new(mailer.clone()));
    (daemon, mailer)
}

/// Argument vector from string slices
pub fn args(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// Poll `check` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
