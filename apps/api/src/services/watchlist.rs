//! Watchlist passthrough store
//!
//! The daemon only maps requests onto a store; the real watchlist lives with
//! the media library. [`MemoryWatchlist`] keeps entries for the lifetime of
//! the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// One watched title, keyed by its IMDb id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub imdb_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// `movie`, `show`, ...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    pub added_at: DateTime<Utc>,
}

/// Body of `POST /watchlist`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWatchlistEntry {
    #[serde(default)]
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub year: Option<u16>,
}

/// Check an IMDb-style identifier: `tt` followed by digits
pub fn validate_imdb_id(raw: Option<&str>) -> ApiResult<String> {
    let id = raw.map(str::trim).unwrap_or_default();
    if id.is_empty() {
        return Err(ApiError::ValidationError("imdb_id is required".to_string()));
    }
    let well_formed = id
        .strip_prefix("tt")
        .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false);
    if !well_formed {
        return Err(ApiError::ValidationError(format!(
            "imdb_id must look like tt0123456, got '{}'",
            id
        )));
    }
    Ok(id.to_string())
}

impl NewWatchlistEntry {
    /// Validate and stamp the entry
    pub fn into_entry(self, now: DateTime<Utc>) -> ApiResult<WatchlistEntry> {
        let imdb_id = validate_imdb_id(self.imdb_id.as_deref())?;
        Ok(WatchlistEntry {
            imdb_id,
            title: self.title.filter(|t| !t.trim().is_empty()),
            kind: self.kind.map(|k| k.to_lowercase()),
            year: self.year,
            added_at: now,
        })
    }
}

/// Storage behind the watchlist routes
#[async_trait]
pub trait WatchlistStore: Send + Sync {
    async fn list(&self) -> ApiResult<Vec<WatchlistEntry>>;

    async fn get(&self, imdb_id: &str) -> ApiResult<Option<WatchlistEntry>>;

    /// Insert or update; an existing entry keeps its `added_at`
    async fn upsert(&self, entry: WatchlistEntry) -> ApiResult<WatchlistEntry>;

    /// Returns whether an entry was removed
    async fn remove(&self, imdb_id: &str) -> ApiResult<bool>;
}

/// In-process watchlist
#[derive(Debug, Default)]
pub struct MemoryWatchlist {
    entries: DashMap<String, WatchlistEntry>,
}

impl MemoryWatchlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl WatchlistStore for MemoryWatchlist {
    async fn list(&self) -> ApiResult<Vec<WatchlistEntry>> {
        let mut entries: Vec<WatchlistEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| {
            a.added_at
                .cmp(&b.added_at)
                .then_with(|| a.imdb_id.cmp(&b.imdb_id))
        });
        Ok(entries)
    }

    async fn get(&self, imdb_id: &str) -> ApiResult<Option<WatchlistEntry>> {
        Ok(self.entries.get(imdb_id).map(|e| e.value().clone()))
    }

    async fn upsert(&self, mut entry: WatchlistEntry) -> ApiResult<WatchlistEntry> {
        let mut slot = self
            .entries
            .entry(entry.imdb_id.clone())
            .or_insert_with(|| entry.clone());
        entry.added_at = slot.added_at;
        *slot = entry.clone();
        Ok(entry)
    }

    async fn remove(&self, imdb_id: &str) -> ApiResult<bool> {
        Ok(self.entries.remove(imdb_id).is_some())
    }
}
