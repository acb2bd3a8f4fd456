//! Commands for exercising the job engine
//!
//! [`ScriptedCommand`] plays back a list of steps, which covers logging,
//! email, locals, spawning children and failing. [`ProbeCommand`] just
//! holds its slot and reports through a shared [`Probe`] how many copies
//! are alive, which is what the ceiling and kill tests look at.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use librarian_worker::{
    Command, EnqueueOptions, EnvFlags, JobContext, WorkerError, WorkerResult,
};
use serde_json::Value;

/// One action of a [`ScriptedCommand`]
#[derive(Debug, Clone)]
pub enum Step {
    Log(String),
    Email(String),
    RequestEmail,
    SetLocal(String, Value),
    RemoveLocal(String),
    Enqueue {
        args: Vec<String>,
        opts: EnqueueOptions,
    },
    Consolidate,
    /// Record the context locals as they are at this point
    RecordLocals,
    Sleep(Duration),
    /// Fail while the job's attempt count is below the given number
    FailUntilAttempt(u32),
    Fail(String),
    Panic(String),
}

impl Step {
    pub fn log(line: &str) -> Self {
        Self::Log(line.to_string())
    }

    pub fn email(line: &str) -> Self {
        Self::Email(line.to_string())
    }

    pub fn set_local(key: &str, value: Value) -> Self {
        Self::SetLocal(key.to_string(), value)
    }

    pub fn remove_local(key: &str) -> Self {
        Self::RemoveLocal(key.to_string())
    }

    pub fn enqueue(args: &[&str], opts: EnqueueOptions) -> Self {
        Self::Enqueue {
            args: crate::args(args),
            opts,
        }
    }

    pub fn fail(message: &str) -> Self {
        Self::Fail(message.to_string())
    }
}

/// What a scripted command saw when it started
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub job_id: String,
    pub parent_id: Option<String>,
    pub client: String,
    pub env: EnvFlags,
    pub args: Vec<String>,
    pub locals: BTreeMap<String, Value>,
}

/// Plays back a fixed list of steps
#[derive(Debug, Clone, Default)]
pub struct ScriptedCommand {
    steps: Arc<Vec<Step>>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
    recorded_locals: Arc<Mutex<Vec<BTreeMap<String, Value>>>>,
}

impl ScriptedCommand {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Arc::new(steps),
            invocations: Arc::default(),
            recorded_locals: Arc::default(),
        }
    }

    /// Every run recorded so far, in start order
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Locals captured by [`Step::RecordLocals`], in order
    pub fn recorded_locals(&self) -> Vec<BTreeMap<String, Value>> {
        self.recorded_locals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Command for ScriptedCommand {
    async fn run(&self, ctx: &mut JobContext, args: &[String]) -> WorkerResult<()> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Invocation {
                job_id: ctx.job_id().to_string(),
                parent_id: ctx.job().parent_id.clone(),
                client: ctx.client().to_string(),
                env: ctx.env().clone(),
                args: args.to_vec(),
                locals: ctx.locals().clone(),
            });

        for step in self.steps.iter() {
            match step {
                Step::Log(line) => ctx.log(line.clone()),
                Step::Email(line) => ctx.email(line.clone()),
                Step::RequestEmail => ctx.request_email(),
                Step::SetLocal(key, value) => {
                    ctx.set_local(key.clone(), value.clone());
                }
                Step::RemoveLocal(key) => {
                    ctx.remove_local(key);
                }
                Step::Enqueue { args, opts } => {
                    ctx.enqueue(args.clone(), opts.clone()).await?;
                }
                Step::Consolidate => ctx.consolidate_children().await?,
                Step::RecordLocals => {
                    let locals = ctx.locals().clone();
                    self.recorded_locals
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(locals);
                }
                Step::Sleep(duration) => tokio::time::sleep(*duration).await,
                Step::FailUntilAttempt(attempt) => {
                    if ctx.job().attempts() < *attempt {
                        return Err(WorkerError::failed(format!(
                            "attempt {} failed",
                            ctx.job().attempts()
                        )));
                    }
                }
                Step::Fail(message) => return Err(WorkerError::failed(message.clone())),
                Step::Panic(message) => panic!("{}", message),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    started: AtomicUsize,
    alive: AtomicUsize,
    max_alive: AtomicUsize,
}

/// Shared counters for [`ProbeCommand`] runs
#[derive(Debug, Clone, Default)]
pub struct Probe {
    state: Arc<ProbeState>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs that have started
    pub fn started(&self) -> usize {
        self.state.started.load(Ordering::SeqCst)
    }

    /// Runs whose execution has not been dropped yet
    pub fn alive(&self) -> usize {
        self.state.alive.load(Ordering::SeqCst)
    }

    /// Highest number of runs alive at the same time
    pub fn max_alive(&self) -> usize {
        self.state.max_alive.load(Ordering::SeqCst)
    }
}

struct AliveGuard(Arc<ProbeState>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds its slot for a while, or until killed
#[derive(Debug, Clone)]
pub struct ProbeCommand {
    probe: Probe,
    hold: Option<Duration>,
}

impl ProbeCommand {
    /// Run until the execution unit is stopped
    pub fn forever(probe: &Probe) -> Self {
        Self {
            probe: probe.clone(),
            hold: None,
        }
    }

    /// Run for `hold`, then succeed
    pub fn holding(probe: &Probe, hold: Duration) -> Self {
        Self {
            probe: probe.clone(),
            hold: Some(hold),
        }
    }
}

#[async_trait]
impl Command for ProbeCommand {
    async fn run(&self, _ctx: &mut JobContext, _args: &[String]) -> WorkerResult<()> {
        let state = self.probe.state.clone();
        state.started.fetch_add(1, Ordering::SeqCst);
        let alive = state.alive.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_alive.fetch_max(alive, Ordering::SeqCst);
        let _guard = AliveGuard(state);

        match self.hold {
            Some(hold) => tokio::time::sleep(hold).await,
            None => std::future::pending::<()>().await,
        }
        Ok(())
    }
}
