//! Shared state handed to every control route

use std::sync::Arc;

use librarian_worker::{Daemon, PeriodicScheduler};

use crate::middleware::AuthPolicy;
use crate::services::{MemoryWatchlist, MetricsService, WatchlistStore};

/// Services behind the control server, cheap to clone
#[derive(Clone)]
pub struct AppState {
    /// Job engine
    pub daemon: Daemon,
    /// Periodic scheduler, for template reloads
    pub scheduler: Arc<PeriodicScheduler>,
    /// Store behind the watchlist routes
    pub watchlist: Arc<dyn WatchlistStore>,
    /// Process resource sampler
    pub metrics: Arc<MetricsService>,
    /// Token policy for protected routes
    pub auth: AuthPolicy,
}

impl AppState {
    /// State with an in-memory watchlist
    pub fn new(daemon: Daemon, scheduler: Arc<PeriodicScheduler>, auth: AuthPolicy) -> Self {
        Self {
            daemon,
            scheduler,
            watchlist: Arc::new(MemoryWatchlist::new()),
            metrics: Arc::new(MetricsService::new()),
            auth,
        }
    }

    pub fn with_watchlist(mut self, watchlist: Arc<dyn WatchlistStore>) -> Self {
        self.watchlist = watchlist;
        self
    }
}
