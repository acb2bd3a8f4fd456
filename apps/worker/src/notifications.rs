//! Notification buffers and their propagation up the job tree
//!
//! Every pooled job owns a [`NotificationBuffer`]. Jobs with a parent write
//! their log lines into it instead of emitting them live; on completion the
//! buffer is merged into the parent's. Root jobs deliver what they hold:
//! deferred log lines are flushed through the live channel and the email
//! digest goes to the [`Mailer`].

use async_trait::async_trait;
use serde::Serialize;

use crate::error::WorkerResult;

/// Target used for live job log lines
pub const JOB_LOG_TARGET: &str = "librarian::job";

/// Deferred log lines and pending email for one job
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NotificationBuffer {
    /// Log lines not yet flushed live
    pub log: Vec<String>,
    /// Email body lines
    pub email: Vec<String>,
    /// Whether the email should be sent once the tree completes
    pub send_email: bool,
    closed: bool,
}

impl NotificationBuffer {
    pub fn is_empty(&self) -> bool {
        self.log.is_empty() && self.email.is_empty() && !self.send_email
    }

    /// Check whether the owning job has already delivered or merged upward
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Move the contents out, leaving an empty buffer behind
    pub fn drain(&mut self) -> NotificationBuffer {
        NotificationBuffer {
            log: std::mem::take(&mut self.log),
            email: std::mem::take(&mut self.email),
            send_email: std::mem::replace(&mut self.send_email, false),
            closed: false,
        }
    }

    /// Drain and refuse further merges
    pub(crate) fn close(&mut self) -> NotificationBuffer {
        let contents = self.drain();
        self.closed = true;
        contents
    }
}

/// Append a child's buffered notifications to its parent's
///
/// Log and email lines keep their order; the parent's send flag is OR'd with
/// the child's.
pub fn merge_notifications(child: &mut NotificationBuffer, parent: &mut NotificationBuffer) {
    parent.log.append(&mut child.log);
    parent.email.append(&mut child.email);
    parent.send_email |= child.send_email;
    child.send_email = false;
}

/// Email produced by a root job tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailDigest {
    pub job_id: String,
    pub task: String,
    pub client: String,
    pub lines: Vec<String>,
}

impl EmailDigest {
    pub fn subject(&self) -> String {
        format!("[librarian] {}", self.task)
    }

    pub fn body(&self) -> String {
        self.lines.join("\n")
    }
}

/// Outbound email delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, digest: EmailDigest) -> WorkerResult<()>;
}

/// Mailer that records digests in the log
#[derive(Debug, Default, Clone)]
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn deliver(&self, digest: EmailDigest) -> WorkerResult<()> {
        tracing::info!(
            job_id = %digest.job_id,
            client = %digest.client,
            lines = digest.lines.len(),
            subject = %digest.subject(),
            "Email digest ready"
        );
        tracing::debug!(body = %digest.body(), "Email digest body");
        Ok(())
    }
}
