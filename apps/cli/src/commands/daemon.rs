//! `librarian daemon` - Daemon management commands

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Subcommand;
use serde_json::json;

use crate::client::ControlClient;
use crate::exit_error::{ExitError, EXIT_FAILURE, EXIT_NOT_RUNNING};
use crate::output::{format_or_json, status_lines, OutputFormat};

/// Daemon binary installed next to the CLI
pub const DAEMON_BINARY: &str = "librarian-daemon";

/// How long `daemon start` waits for the liveness probe
const START_TIMEOUT: Duration = Duration::from_secs(10);
const START_POLL: Duration = Duration::from_millis(100);

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Start the daemon (background unless --foreground)
    Start {
        /// Run in the foreground (useful for debugging)
        #[arg(long)]
        foreground: bool,
    },
    /// Cancel every job and stop the daemon
    Stop,
    /// Show running, queued and finished jobs
    Status,
    /// Re-read periodic templates
    Reload,
    /// Cancel a job, or every job with `--jid all`
    Kill {
        /// Job id, requested id, or `all`
        #[arg(long)]
        jid: String,
    },
}

pub async fn daemon(command: DaemonCommand, client: &ControlClient, format: OutputFormat) -> Result<()> {
    match command {
        DaemonCommand::Start { foreground } => start(client, foreground).await,
        DaemonCommand::Stop => stop(client, format).await,
        DaemonCommand::Status => status(client, format).await,
        DaemonCommand::Reload => reload(client, format).await,
        DaemonCommand::Kill { jid } => kill(client, &jid, format).await,
    }
}

async fn start(client: &ControlClient, foreground: bool) -> Result<()> {
    let daemon_path = find_daemon_binary()?;

    if foreground {
        let status = Command::new(&daemon_path).status()?;
        if !status.success() {
            return Err(ExitError::new(
                status.code().unwrap_or(EXIT_FAILURE),
                format!("Daemon exited with {}", status),
            )
            .into());
        }
        return Ok(());
    }

    if client.is_alive().await {
        println!("Daemon already running at {}", client.base_url());
        return Ok(());
    }

    let mut child = Command::new(&daemon_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn {}: {}", daemon_path.display(), e))?;

    let deadline = tokio::time::Instant::now() + START_TIMEOUT;
    loop {
        // A daemon that refuses to start (bind without tokens, bad config) exits
        if let Some(status) = child.try_wait()? {
            return Err(ExitError::new(
                status.code().filter(|c| *c != 0).unwrap_or(EXIT_FAILURE),
                format!("Daemon failed to start ({})", status),
            )
            .into());
        }
        if client.is_alive().await {
            println!("Daemon started (pid {}) at {}", child.id(), client.base_url());
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ExitError::new(
                EXIT_FAILURE,
                format!(
                    "Daemon did not answer at {} within {}s",
                    client.base_url(),
                    START_TIMEOUT.as_secs()
                ),
            )
            .into());
        }
        tokio::time::sleep(START_POLL).await;
    }
}

async fn stop(client: &ControlClient, format: OutputFormat) -> Result<()> {
    let summary = match client.stop().await {
        Ok(summary) => summary,
        Err(e) if e.is_not_running() => return print_not_running(format),
        Err(e) => return Err(e.into()),
    };
    format_or_json(format, &summary, || {
        println!("Daemon stopping ({} job(s) cancelled)", summary.cancelled)
    })
}

async fn status(client: &ControlClient, format: OutputFormat) -> Result<()> {
    let status = match client.status().await {
        Ok(status) => status,
        Err(e) if e.is_not_running() => {
            print_not_running(format)?;
            return Err(ExitError::new(EXIT_NOT_RUNNING, String::new()).into());
        }
        Err(e) => return Err(e.into()),
    };
    format_or_json(format, &status, || {
        for line in status_lines(&status) {
            println!("{}", line);
        }
    })
}

async fn reload(client: &ControlClient, format: OutputFormat) -> Result<()> {
    let summary = client.reload().await?;
    format_or_json(format, &summary, || {
        println!(
            "Templates reloaded ({} dropped, {} loaded)",
            summary.dropped,
            summary.loaded.len()
        );
        for problem in &summary.errors {
            let template = problem.get("template").and_then(|v| v.as_str()).unwrap_or("?");
            let error = problem.get("error").and_then(|v| v.as_str()).unwrap_or("");
            println!("  {}: {}", template, error);
        }
    })?;
    if summary.errors.is_empty() {
        Ok(())
    } else {
        Err(ExitError::new(EXIT_FAILURE, String::new()).into())
    }
}

async fn kill(client: &ControlClient, jid: &str, format: OutputFormat) -> Result<()> {
    let summary = client.kill(jid).await?;
    format_or_json(format, &summary, || {
        println!("Killed {} job(s)", summary.killed)
    })
}

fn print_not_running(format: OutputFormat) -> Result<()> {
    let obj = json!({ "status": "not_running" });
    format_or_json(format, &obj, || println!("Daemon not running"))
}

/// Locate the daemon binary, preferring the CLI's own directory
pub fn find_daemon_binary() -> Result<PathBuf> {
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
    {
        let sibling = dir.join(DAEMON_BINARY);
        if sibling.exists() {
            return Ok(sibling);
        }
    }

    let on_path = std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(DAEMON_BINARY))
            .find(|candidate| candidate.exists())
    });
    on_path.ok_or_else(|| anyhow!("{} not found next to the CLI or on PATH", DAEMON_BINARY))
}
