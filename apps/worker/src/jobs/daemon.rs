//! Daemon housekeeping commands

use std::time::Duration;

use async_trait::async_trait;

use crate::context::JobContext;
use crate::dispatcher::Command;
use crate::error::{WorkerError, WorkerResult};
use crate::job::JobStatus;
use crate::pool::EnqueueOptions;

fn parse_arg<T: std::str::FromStr>(args: &[String], index: usize, name: &str) -> WorkerResult<Option<T>> {
    args.get(index)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| WorkerError::InvalidArgs(format!("{} must be a number, got '{}'", name, raw)))
        })
        .transpose()
}

/// `Daemon sleep <seconds>`
#[derive(Debug, Default, Clone, Copy)]
pub struct Sleep;

#[async_trait]
impl Command for Sleep {
    async fn run(&self, ctx: &mut JobContext, args: &[String]) -> WorkerResult<()> {
        let seconds: f64 = parse_arg(args, 0, "seconds")?.unwrap_or(1.0);
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(WorkerError::InvalidArgs(format!(
                "seconds must be positive, got {}",
                seconds
            )));
        }
        if ctx.is_pretend() {
            ctx.log(format!("would sleep {}s", seconds));
            return Ok(());
        }

        ctx.debug(format!("sleeping {}s", seconds));
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(())
    }
}

/// `Daemon echo <words..>`
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

#[async_trait]
impl Command for Echo {
    async fn run(&self, ctx: &mut JobContext, args: &[String]) -> WorkerResult<()> {
        ctx.log(args.join(" "));
        Ok(())
    }
}

/// `Daemon fail [message..]`
#[derive(Debug, Default, Clone, Copy)]
pub struct Fail;

#[async_trait]
impl Command for Fail {
    async fn run(&self, _ctx: &mut JobContext, args: &[String]) -> WorkerResult<()> {
        let message = if args.is_empty() {
            "failed on request".to_string()
        } else {
            args.join(" ")
        };
        Err(WorkerError::CommandFailed(message))
    }
}

/// `Daemon fanout <count> [seconds]`
///
/// Spawns `count` sleeping children on a side queue and waits for all of
/// them. The side queue keeps the children from waiting on the parent's own
/// queue permit.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fanout;

#[async_trait]
impl Command for Fanout {
    async fn run(&self, ctx: &mut JobContext, args: &[String]) -> WorkerResult<()> {
        let count: usize = parse_arg(args, 0, "count")?.unwrap_or(2);
        let seconds = args.get(1).cloned().unwrap_or_else(|| "0".to_string());
        let queue = format!("{}_fanout", ctx.job().queue);

        for _ in 0..count {
            ctx.enqueue(
                vec!["Daemon".into(), "sleep".into(), seconds.clone()],
                EnqueueOptions::new()
                    .queue(queue.clone())
                    .concurrency(count.max(1))
                    .child(true),
            )
            .await?;
        }
        ctx.consolidate_children().await?;

        let failed = ctx
            .job()
            .children_ids()
            .iter()
            .filter_map(|id| ctx.daemon().registry().get(id).ok())
            .filter(|child| child.status() != JobStatus::Finished)
            .count();
        ctx.log(format!("{} children done, {} not finished", count, failed));

        if failed > 0 {
            return Err(WorkerError::failed(format!("{} of {} children failed", failed, count)));
        }
        Ok(())
    }
}
