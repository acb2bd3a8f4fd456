//! Command-line surface

pub mod daemon;
pub mod job;

use anyhow::Result;
use clap::{Parser, Subcommand};
use librarian_shared_config::ControlConfig;

use crate::client::ControlClient;
use crate::output::OutputFormat;

/// Librarian - remote control for the librarian daemon
#[derive(Parser, Debug)]
#[command(name = "librarian")]
#[command(version, about = "Remote control for the librarian daemon", long_about = None)]
pub struct Cli {
    /// Control server URL (default: derived from LIBRARIAN_BIND_ADDRESS and LIBRARIAN_PORT)
    #[arg(long, global = true, env = "LIBRARIAN_URL")]
    pub url: Option<String>,

    /// Control token, sent as a bearer token
    #[arg(long, global = true, env = "LIBRARIAN_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the daemon
    Daemon {
        #[command(subcommand)]
        command: daemon::DaemonCommand,
    },
    /// Submit a command to the daemon
    Enqueue(job::EnqueueArgs),
    /// Show one job
    Job {
        /// Job id, or the id requested at submission
        id: String,
    },
}

impl Cli {
    pub fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }

    /// Control settings from the environment, overridden by flags
    pub fn control_config(&self) -> Result<ControlConfig> {
        let mut config = ControlConfig::from_env()?;
        if let Some(url) = &self.url {
            config.url = Some(url.clone());
        }
        if let Some(token) = &self.token {
            config.client_token = Some(token.clone());
        }
        Ok(config)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let format = cli.format();
    let config = cli.control_config()?;
    let client = ControlClient::from_config(&config)?;

    match cli.command {
        Command::Daemon { command } => daemon::daemon(command, &client, format).await,
        Command::Enqueue(args) => job::enqueue(args, &client, format).await,
        Command::Job { id } => job::show(&id, &client, format).await,
    }
}
