//! Mailer that records digests for assertions

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use librarian_worker::{EmailDigest, Mailer, WorkerResult};

/// Keeps every delivered digest in memory
///
/// Clones share the same list.
#[derive(Debug, Default, Clone)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<EmailDigest>>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digests delivered so far
    pub fn sent(&self) -> Vec<EmailDigest> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Digests delivered for one job
    pub fn sent_for(&self, job_id: &str) -> Vec<EmailDigest> {
        self.sent()
            .into_iter()
            .filter(|digest| digest.job_id == job_id)
            .collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, digest: EmailDigest) -> WorkerResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(digest);
        Ok(())
    }
}
