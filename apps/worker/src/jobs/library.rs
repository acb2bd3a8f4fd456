//! Library commands

use async_trait::async_trait;

use crate::context::JobContext;
use crate::dispatcher::Command;
use crate::error::WorkerResult;

/// Does nothing and succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct Noop;

#[async_trait]
impl Command for Noop {
    async fn run(&self, ctx: &mut JobContext, _args: &[String]) -> WorkerResult<()> {
        ctx.debug("noop");
        Ok(())
    }
}
