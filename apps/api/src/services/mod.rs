//! Services behind the control routes
//!
//! - Process resource metrics for `/status`
//! - The watchlist store the `/watchlist` routes pass through to

pub mod metrics;
pub mod watchlist;

pub use metrics::{MetricsService, ProcessMetrics};
pub use watchlist::{MemoryWatchlist, NewWatchlistEntry, WatchlistEntry, WatchlistStore};
