//! Per-queue concurrency limits
//!
//! Each queue gets one fair semaphore sized to its limit. A job holds a
//! permit for as long as it is running, so the number of running jobs in a
//! queue can never exceed the limit, and waiters are admitted in the order
//! they started waiting.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{WorkerError, WorkerResult};

/// Limit applied to queues nobody registered
pub const DEFAULT_QUEUE_LIMIT: usize = 1;

#[derive(Debug, Clone)]
struct Lane {
    limit: usize,
    permits: Arc<Semaphore>,
}

impl Lane {
    fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            permits: Arc::new(Semaphore::new(limit)),
        }
    }
}

/// Queue admission controller
#[derive(Debug, Default)]
pub struct QueueAdmission {
    lanes: DashMap<String, Lane>,
}

impl QueueAdmission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a limit for `queue`
    ///
    /// The first registration wins and lasts for the process lifetime.
    /// Returns the limit in effect afterwards.
    pub fn register_queue_limit(&self, queue: &str, limit: usize) -> usize {
        self.lanes
            .entry(queue.to_string())
            .or_insert_with(|| Lane::new(limit))
            .limit
    }

    /// Registered limit for `queue`, if any
    pub fn queue_limit(&self, queue: &str) -> Option<usize> {
        self.lanes.get(queue).map(|lane| lane.limit)
    }

    /// Limit in effect for `queue`
    pub fn limit_or_default(&self, queue: &str) -> usize {
        self.queue_limit(queue).unwrap_or(DEFAULT_QUEUE_LIMIT)
    }

    fn lane(&self, queue: &str) -> Lane {
        self.lanes
            .entry(queue.to_string())
            .or_insert_with(|| Lane::new(DEFAULT_QUEUE_LIMIT))
            .clone()
    }

    /// Wait until `queue` has room and claim a place in it
    pub async fn acquire(&self, queue: &str) -> WorkerResult<OwnedSemaphorePermit> {
        self.lane(queue)
            .permits
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::Internal(format!("queue '{}' closed", queue)))
    }

    /// Claim a place in `queue` only if one is free right now
    pub fn try_acquire(&self, queue: &str) -> Option<OwnedSemaphorePermit> {
        self.lane(queue).permits.try_acquire_owned().ok()
    }

    /// Number of places currently taken in `queue`
    pub fn in_use(&self, queue: &str) -> usize {
        self.lanes
            .get(queue)
            .map(|lane| lane.limit.saturating_sub(lane.permits.available_permits()))
            .unwrap_or(0)
    }

    /// Registered queue names with their limits
    pub fn limits(&self) -> Vec<(String, usize)> {
        let mut limits: Vec<_> = self
            .lanes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().limit))
            .collect();
        limits.sort();
        limits
    }
}
