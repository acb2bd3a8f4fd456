//! `librarian enqueue` and `librarian job`

use anyhow::Result;
use clap::Args;

use crate::client::ControlClient;
use crate::exit_error::{ExitError, EXIT_FAILURE};
use crate::models::EnqueueRequest;
use crate::output::{format_or_json, job_lines, OutputFormat};

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Queue to run on (default: "default")
    #[arg(long)]
    pub queue: Option<String>,

    /// Block until the job is done and print its output
    #[arg(long)]
    pub wait: bool,

    /// Client name recorded on the job
    #[arg(long, default_value = "cli")]
    pub client: String,

    /// Requested job id
    #[arg(long)]
    pub id: Option<String>,

    /// Command words followed by their arguments, e.g. `-- Library noop`
    #[arg(last = true, required = true)]
    pub args: Vec<String>,
}

impl EnqueueArgs {
    pub fn to_request(&self) -> EnqueueRequest {
        EnqueueRequest {
            args: self.args.clone(),
            queue: self.queue.clone(),
            client: Some(self.client.clone()),
            wait: self.wait,
            id: self.id.clone(),
        }
    }
}

pub async fn enqueue(args: EnqueueArgs, client: &ControlClient, format: OutputFormat) -> Result<()> {
    let job = client.enqueue(&args.to_request()).await?;

    format_or_json(format, &job, || {
        if args.wait {
            for line in job_lines(&job) {
                println!("{}", line);
            }
        } else {
            println!("{}", job.id);
        }
    })?;

    if args.wait && !job.is_success() {
        return Err(ExitError::new(EXIT_FAILURE, String::new()).into());
    }
    Ok(())
}

pub async fn show(id: &str, client: &ControlClient, format: OutputFormat) -> Result<()> {
    let job = client.job(id).await?;
    format_or_json(format, &job, || {
        for line in job_lines(&job) {
            println!("{}", line);
        }
    })
}
