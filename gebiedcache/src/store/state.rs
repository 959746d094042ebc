//! Cached entries and per-key attempt bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::Shared;
use tokio::time::Instant;

use super::error::FetchError;
use crate::area::AreaKey;
use crate::geo::{BoundingBox, Feature};
use crate::poi::PointOfInterest;
use crate::source::BoxFuture;

/// The eventual outcome of one attempt sequence, shared by every joiner.
pub(crate) type PendingFetch =
    Shared<BoxFuture<'static, Result<Arc<CacheEntry>, FetchError>>>;

/// A successful fetch result for one area.
///
/// Immutable once created; a later successful fetch replaces the whole entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: AreaKey,
    pub geometry: Feature,
    /// Buffered bounding box the items were fetched for.
    pub bbox: BoundingBox,
    pub items: Vec<PointOfInterest>,
    /// Monotonic fetch time, used for expiry.
    pub fetched_at: Instant,
    /// Wall-clock fetch time, for display.
    pub fetched_at_utc: DateTime<Utc>,
}

impl CacheEntry {
    /// Time since the entry was fetched.
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.fetched_at)
    }

    /// Whether the entry is still within `ttl` at `now`.
    ///
    /// An entry exactly `ttl` old is stale.
    pub fn is_fresh_at(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.fetched_at) < ttl
    }
}

/// Lifecycle of the fetch for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptStatus {
    /// Never requested, or invalidated.
    Idle,
    /// A fetch sequence is running.
    InFlight,
    /// The last sequence installed an entry.
    Succeeded,
    /// The last sequence exhausted its retries.
    Failed,
}

impl AttemptStatus {
    /// User-facing status text.
    pub fn display_status(&self) -> &'static str {
        match self {
            Self::Idle => "Not loaded",
            Self::InFlight => "Loading...",
            Self::Succeeded => "Loaded",
            Self::Failed => "Unavailable",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_status())
    }
}

/// Internal attempt state for one key.
pub(crate) struct AttemptState {
    /// Identifies the attempt sequence that owns this key.
    pub id: u64,
    pub status: AttemptStatus,
    pub pending: Option<PendingFetch>,
    pub last_error: Option<FetchError>,
    pub retry_count: u32,
}

impl AttemptState {
    pub fn in_flight(id: u64, pending: PendingFetch) -> Self {
        Self {
            id,
            status: AttemptStatus::InFlight,
            pending: Some(pending),
            last_error: None,
            retry_count: 0,
        }
    }

    pub fn info(&self) -> AttemptInfo {
        AttemptInfo {
            status: self.status,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only snapshot of a key's attempt state.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptInfo {
    pub status: AttemptStatus,
    /// Retries performed by the current (or last) sequence.
    pub retry_count: u32,
    /// Error of the last failed sequence, or the latest retried failure
    /// while in flight.
    pub last_error: Option<FetchError>,
}

/// Both maps, guarded together by the store's lock.
#[derive(Default)]
pub(crate) struct StoreState {
    pub entries: HashMap<AreaKey, Arc<CacheEntry>>,
    pub attempts: HashMap<AreaKey, AttemptState>,
}

impl StoreState {
    /// The entry for `key` if it is fresh at `now`.
    pub fn fresh_entry(
        &self,
        key: &AreaKey,
        now: Instant,
        ttl: Duration,
    ) -> Option<Arc<CacheEntry>> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh_at(now, ttl))
            .cloned()
    }

    /// Whether `id` still owns `key`'s attempt state.
    pub fn owns(&self, key: &AreaKey, id: u64) -> bool {
        self.attempts.get(key).is_some_and(|a| a.id == id)
    }
}

/// Store activity counters.
#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub joins: AtomicU64,
    pub fetches_started: AtomicU64,
    pub fetches_succeeded: AtomicU64,
    pub fetches_failed: AtomicU64,
    pub retries: AtomicU64,
}

impl StoreCounters {
    pub fn snapshot(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_succeeded: self.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of store activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `ensure` calls answered from a fresh entry.
    pub hits: u64,
    /// `ensure` calls that found no fresh entry.
    pub misses: u64,
    /// Misses that joined an in-flight sequence.
    pub joins: u64,
    /// Attempt sequences started.
    pub fetches_started: u64,
    /// Sequences that installed an entry. A sequence whose key was
    /// invalidated mid-flight counts as neither success nor failure.
    pub fetches_succeeded: u64,
    /// Sequences that marked their key `Failed`.
    pub fetches_failed: u64,
    /// Retries across all sequences.
    pub retries: u64,
}

impl StoreStats {
    /// Fraction of lookups answered from cache (0.0 when idle).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hits, {} misses ({} joined), {} fetches ({} ok, {} failed, {} retries)",
            self.hits,
            self.misses,
            self.joins,
            self.fetches_started,
            self.fetches_succeeded,
            self.fetches_failed,
            self.retries
        )
    }
}
