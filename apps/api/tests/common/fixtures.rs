//! Test fixtures for control server integration tests
//!
//! Builds a real daemon and scheduler behind the router, with a recording
//! mailer and a throwaway template directory.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use librarian_api::{build_router, AppState, AuthPolicy};
use librarian_test_utils::{daemon_with, ProbeCommand, Probe, RecordingMailer};
use librarian_worker::jobs::builtin_commands;
use librarian_worker::{CommandTable, Daemon, PeriodicScheduler, TemplateStore};
use tempfile::TempDir;

/// Token accepted by [`TestApp::with_token`]
pub const TEST_TOKEN: &str = "test-control-token";

/// Upper bound for anything a test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Scheduled template written into every test template directory
pub const NIGHTLY_TEMPLATE: &str = r#"
[periodic.noop]
command = "Library noop"
every = "1 day"
"#;

/// Daemon, state and router wired together for one test
pub struct TestApp {
    pub state: AppState,
    pub daemon: Daemon,
    pub mailer: RecordingMailer,
    pub probe: Probe,
    pub templates: TempDir,
}

impl TestApp {
    /// App with no tokens configured
    pub fn open() -> Self {
        Self::build(AuthPolicy::Open)
    }

    /// App that requires [`TEST_TOKEN`]
    pub fn with_token() -> Self {
        Self::build(AuthPolicy::with_tokens(&[TEST_TOKEN]))
    }

    pub fn build(auth: AuthPolicy) -> Self {
        let probe = Probe::new();
        let commands = test_commands(&probe);
        let (daemon, mailer) = daemon_with(2, commands);

        let templates = tempfile::tempdir().expect("create template dir");
        fs::write(templates.path().join("nightly.toml"), NIGHTLY_TEMPLATE)
            .expect("write template");

        let store = Arc::new(TemplateStore::new(templates.path()));
        let scheduler = Arc::new(PeriodicScheduler::new(
            daemon.clone(),
            store,
            vec!["nightly".to_string(), "missing".to_string()],
        ));
        let state = AppState::new(daemon.clone(), scheduler, auth);

        Self {
            state,
            daemon,
            mailer,
            probe,
            templates,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }
}

/// Built-in commands plus `Test block`, which runs until cancelled
pub fn test_commands(probe: &Probe) -> CommandTable {
    builtin_commands().with("Test", "block", ProbeCommand::forever(probe))
}
