//! Librarian job engine
//!
//! In-process job scheduling for the librarian daemon:
//!
//! - [`registry`]: every job the daemon has seen, with status snapshots
//! - [`admission`]: per-queue concurrency ceilings
//! - [`pool`]: the [`Daemon`] service that runs jobs on a bounded pool,
//!   including inline children and cancellation
//! - [`context`]: execution context handed to commands
//! - [`notifications`]: log and email propagation up the job tree
//! - [`dispatcher`]: the closed command table
//! - [`template`], [`interval`], [`scheduler`]: periodic tasks

pub mod admission;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod interval;
pub mod job;
pub mod jobs;
pub mod notifications;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod template;

pub use config::WorkerConfig;
pub use context::JobContext;
pub use dispatcher::{Command, CommandTable};
pub use error::{ErrorSeverity, WorkerError, WorkerResult};
pub use job::{EnvFlags, Job, JobRecord, JobStatus};
pub use notifications::{EmailDigest, Mailer, TracingMailer};
pub use pool::{Daemon, EnqueueOptions};
pub use registry::{QueueMetrics, StatusSnapshot};
pub use scheduler::PeriodicScheduler;
pub use template::TemplateStore;
