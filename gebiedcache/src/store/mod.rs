//! Per-area cache and fetch coordinator.
//!
//! The [`AreaStore`] is the only component that talks to the fetch backends.
//! Callers ask it for an area; it:
//! - Returns a fresh cached entry when one exists
//! - Joins an in-flight fetch for the same key instead of starting another
//! - Otherwise starts one fetch sequence (geometry → bbox → points of interest)
//! - Retries failed attempts with backoff, then records a terminal failure
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          AreaStore                               │
//! │                                                                  │
//! │  ensure(key) ─► ┌─────────────┐                                  │
//! │                 │ Fresh entry │──► Hit ──► Return immediately    │
//! │                 └──────┬──────┘                                  │
//! │                        │ Miss / expired                          │
//! │                        ▼                                         │
//! │                 ┌─────────────┐                                  │
//! │                 │  In flight? │──► Yes ──► Await shared result   │
//! │                 └──────┬──────┘                                  │
//! │                        │ No                                      │
//! │                        ▼                                         │
//! │                 ┌─────────────┐                                  │
//! │                 │ Spawn fetch │──► geometry ─► bbox ─► POIs      │
//! │                 └──────┬──────┘      ▲                  │        │
//! │                        │             └── retry/backoff ─┘        │
//! │                        ▼                                         │
//! │                 ┌─────────────┐                                  │
//! │                 │   Settle    │──► Succeeded + entry | Failed    │
//! │                 └─────────────┘                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! Both maps sit behind one `parking_lot::Mutex`, held only for map work and
//! never across an `.await`. The check-then-act in [`AreaStore::ensure`]
//! happens under a single acquisition, so two callers can never both start a
//! fetch for the same key. The fetch runs on its own tokio task and finishes
//! even if every caller stops waiting.
//!
//! Each sequence carries an attempt id. A sequence only installs its result
//! if it still owns the key's attempt state, so a fetch that was in flight
//! during [`AreaStore::invalidate`] delivers to its joiners but never
//! repopulates the cache.
//!
//! # Example
//!
//! ```ignore
//! use gebiedcache::store::{AreaStore, StoreConfig};
//!
//! let store = AreaStore::new(StoreConfig::default(), geometry, points);
//! let entry = store.ensure(&AreaKey::new("BU03630000")).await?;
//! println!("{} facilities", entry.items.len());
//! ```

mod error;
mod policy;
mod state;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::area::AreaKey;
use crate::geo::BboxBuffer;
use crate::source::{GeometrySource, PoiSource};

pub use error::FetchError;
pub use policy::{
    Delay, NoDelay, RetryPolicy, TokioDelay, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BACKOFF_STEP_MS,
    DEFAULT_MAX_DELAY_SECS, DEFAULT_MAX_RETRIES,
};
pub use state::{AttemptInfo, AttemptStatus, CacheEntry, StoreStats};

use state::{AttemptState, PendingFetch, StoreCounters, StoreState};

// =============================================================================
// Configuration
// =============================================================================

/// Default freshness window for cached entries (30 minutes).
pub const DEFAULT_TTL_SECS: u64 = 30 * 60;

/// Configuration for the area store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreConfig {
    /// How long an entry is served after it was fetched.
    pub ttl: Duration,

    /// Retry budget and backoff between attempts.
    pub retry: RetryPolicy,

    /// Whether a missing geometry is retried like a transient failure.
    ///
    /// The backend cannot tell "no such area" from a transient miss, so the
    /// default spends the retry budget on it. Set to `false` to fail fast.
    pub retry_missing_geometry: bool,

    /// Buffer added around the area before querying points of interest.
    pub bbox_buffer: BboxBuffer,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            retry: RetryPolicy::default(),
            retry_missing_geometry: true,
            bbox_buffer: BboxBuffer::default(),
        }
    }
}

impl StoreConfig {
    /// Set the entry time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Keep the retry shape but change the number of retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.retry = self.retry.with_max_retries(retries);
        self
    }

    /// Set whether missing geometry consumes retry budget.
    pub fn with_retry_missing_geometry(mut self, retry: bool) -> Self {
        self.retry_missing_geometry = retry;
        self
    }

    /// Set the bounding-box buffer.
    pub fn with_bbox_buffer(mut self, buffer: BboxBuffer) -> Self {
        self.bbox_buffer = buffer;
        self
    }
}

// =============================================================================
// Area Store
// =============================================================================

/// Cache and fetch coordinator for area data.
///
/// Cheap to clone; clones share the same cache. Create one per session and
/// hand clones to every consumer.
#[derive(Clone)]
pub struct AreaStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    geometry: Arc<dyn GeometrySource>,
    points: Arc<dyn PoiSource>,
    delay: Arc<dyn Delay>,
    state: Mutex<StoreState>,
    counters: StoreCounters,
    next_attempt_id: AtomicU64,
}

impl AreaStore {
    /// Creates a store that waits out backoff on the tokio timer.
    pub fn new(
        config: StoreConfig,
        geometry: Arc<dyn GeometrySource>,
        points: Arc<dyn PoiSource>,
    ) -> Self {
        Self::with_delay(config, geometry, points, Arc::new(TokioDelay))
    }

    /// Creates a store with a custom backoff delay.
    pub fn with_delay(
        config: StoreConfig,
        geometry: Arc<dyn GeometrySource>,
        points: Arc<dyn PoiSource>,
        delay: Arc<dyn Delay>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                geometry,
                points,
                delay,
                state: Mutex::new(StoreState::default()),
                counters: StoreCounters::default(),
                next_attempt_id: AtomicU64::new(1),
            }),
        }
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Returns the cached entry for `key` if it is still fresh.
    ///
    /// Never starts a fetch and never changes store state.
    pub fn peek(&self, key: &AreaKey) -> Option<Arc<CacheEntry>> {
        self.inner
            .state
            .lock()
            .fresh_entry(key, Instant::now(), self.inner.config.ttl)
    }

    /// Returns the entry for `key`, fetching it if needed.
    ///
    /// Concurrent calls for the same key share one fetch sequence and all
    /// receive the same outcome. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::RetriesExhausted`] (wrapping the last backend
    /// error) when every attempt failed, or [`FetchError::Aborted`] if the
    /// fetch task panicked. A later call starts a fresh sequence.
    pub async fn ensure(&self, key: &AreaKey) -> Result<Arc<CacheEntry>, FetchError> {
        let pending = {
            let mut state = self.inner.state.lock();

            if let Some(entry) = state.fresh_entry(key, Instant::now(), self.inner.config.ttl) {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(area = %key, "Cache hit");
                return Ok(entry);
            }
            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);

            match state.attempts.get(key).and_then(|a| a.pending.clone()) {
                Some(pending) => {
                    self.inner.counters.joins.fetch_add(1, Ordering::Relaxed);
                    debug!(area = %key, "Joining in-flight fetch");
                    pending
                }
                None => self.start_sequence(&mut state, key),
            }
        };

        pending.await
    }

    /// Drops the entry and attempt state for `key`.
    ///
    /// The next [`ensure`](Self::ensure) fetches again even if the entry was
    /// fresh. A fetch already in flight keeps running but will not be cached.
    pub fn invalidate(&self, key: &AreaKey) {
        let mut state = self.inner.state.lock();
        let had_entry = state.entries.remove(key).is_some();
        let had_attempt = state.attempts.remove(key).is_some();
        debug!(area = %key, had_entry, had_attempt, "Invalidated");
    }

    /// Drops every entry and attempt state.
    pub fn invalidate_all(&self) {
        let mut state = self.inner.state.lock();
        let entries = state.entries.len();
        state.entries.clear();
        state.attempts.clear();
        info!(entries, "Area cache cleared");
    }

    /// Fetch status of `key`; `Idle` if it was never requested.
    pub fn status_of(&self, key: &AreaKey) -> AttemptStatus {
        self.inner
            .state
            .lock()
            .attempts
            .get(key)
            .map_or(AttemptStatus::Idle, |a| a.status)
    }

    /// Status, retry count and last error of `key`, if it was requested.
    pub fn attempt_info(&self, key: &AreaKey) -> Option<AttemptInfo> {
        self.inner.state.lock().attempts.get(key).map(|a| a.info())
    }

    /// Removes expired entries and returns how many were dropped.
    ///
    /// Expiry is otherwise only checked on read; nothing calls this
    /// automatically. Keys whose entry is purged go back to `Idle`.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.inner.config.ttl;
        let mut state = self.inner.state.lock();

        let expired: Vec<AreaKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh_at(now, ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.entries.remove(key);
            if state
                .attempts
                .get(key)
                .is_some_and(|a| a.status == AttemptStatus::Succeeded)
            {
                state.attempts.remove(key);
            }
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "Purged expired entries");
        }
        expired.len()
    }

    /// Number of fresh entries.
    pub fn fresh_count(&self) -> usize {
        let now = Instant::now();
        let ttl = self.inner.config.ttl;
        self.inner
            .state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.is_fresh_at(now, ttl))
            .count()
    }

    /// Activity counters.
    pub fn stats(&self) -> StoreStats {
        self.inner.counters.snapshot()
    }

    /// Marks `key` in flight and spawns its fetch sequence.
    ///
    /// Called with the state lock held, so no other caller can observe the
    /// key between the in-flight check and this registration.
    fn start_sequence(&self, state: &mut StoreState, key: &AreaKey) -> PendingFetch {
        let id = self.inner.next_attempt_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .counters
            .fetches_started
            .fetch_add(1, Ordering::Relaxed);
        debug!(area = %key, attempt_id = id, "Starting fetch");

        let task_inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let sequence = Arc::clone(&task_inner).run_sequence(task_key.clone(), id);
            match AssertUnwindSafe(sequence).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let error = FetchError::Aborted {
                        key: task_key.clone(),
                        reason: panic_reason(&*panic),
                    };
                    warn!(area = %task_key, error = %error, "Area fetch panicked");
                    task_inner.settle_failure(&task_key, id, error.clone());
                    Err(error)
                }
            }
        });

        // Panics are settled inside the task; a join error here means the
        // runtime cancelled it.
        let join_inner = Arc::clone(&self.inner);
        let join_key = key.clone();
        let pending = async move {
            handle.await.unwrap_or_else(|e| {
                let error = FetchError::Aborted {
                    key: join_key.clone(),
                    reason: e.to_string(),
                };
                join_inner.settle_failure(&join_key, id, error.clone());
                Err(error)
            })
        }
        .boxed()
        .shared();

        state
            .attempts
            .insert(key.clone(), AttemptState::in_flight(id, pending.clone()));
        pending
    }
}

/// Text of a panic payload, for `FetchError::Aborted`.
fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("fetch task panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("fetch task panicked: {}", msg)
    } else {
        "fetch task panicked".to_string()
    }
}

impl std::fmt::Debug for AreaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AreaStore")
            .field("geometry", &self.inner.geometry.name())
            .field("points", &self.inner.points.name())
            .field("entries", &state.entries.len())
            .field("attempts", &state.attempts.len())
            .finish()
    }
}

impl StoreInner {
    /// Runs attempts until one succeeds or the retry budget is spent.
    async fn run_sequence(
        self: Arc<Self>,
        key: AreaKey,
        id: u64,
    ) -> Result<Arc<CacheEntry>, FetchError> {
        let mut retry_count = 0u32;

        loop {
            let error = match self.fetch_once(&key).await {
                Ok(entry) => {
                    let entry = Arc::new(entry);
                    self.settle_success(&key, id, &entry, retry_count);
                    return Ok(entry);
                }
                Err(error) => error,
            };

            let retryable = self.config.retry_missing_geometry || !error.is_geometry_missing();
            let next_retry = retry_count + 1;
            let delay = self
                .config
                .retry
                .delay_for_retry(next_retry)
                .filter(|_| retryable);

            let Some(delay) = delay else {
                let exhausted = FetchError::RetriesExhausted {
                    key: key.clone(),
                    attempts: retry_count + 1,
                    last: Box::new(error),
                };
                warn!(area = %key, error = %exhausted, "Area fetch failed");
                self.settle_failure(&key, id, exhausted.clone());
                return Err(exhausted);
            };

            retry_count = next_retry;
            warn!(
                area = %key,
                retry = retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Area fetch attempt failed, retrying"
            );
            self.record_retry(&key, id, retry_count, error);
            self.delay.sleep(delay).await;
        }
    }

    /// One attempt: geometry, bounding box, points of interest.
    async fn fetch_once(&self, key: &AreaKey) -> Result<CacheEntry, FetchError> {
        let geometry = match self.geometry.fetch_geometry(key).await {
            Ok(Some(feature)) => feature,
            Ok(None) => return Err(FetchError::GeometryMissing { key: key.clone() }),
            Err(e) => {
                return Err(FetchError::GeometryLookupFailed {
                    key: key.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let bbox = geometry
            .bbox()
            .map(|b| b.buffered(self.config.bbox_buffer))
            .ok_or_else(|| FetchError::GeometryMissing { key: key.clone() })?;

        let items = self.points.fetch_points(&bbox).await.map_err(|e| {
            FetchError::PointsLookupFailed {
                key: key.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(CacheEntry {
            key: key.clone(),
            geometry,
            bbox,
            items,
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
        })
    }

    /// Installs the entry and marks the key succeeded, in one critical section.
    fn settle_success(&self, key: &AreaKey, id: u64, entry: &Arc<CacheEntry>, retries: u32) {
        let mut state = self.state.lock();
        if !state.owns(key, id) {
            debug!(area = %key, attempt_id = id, "Key invalidated during fetch, not caching");
            return;
        }
        self.counters
            .fetches_succeeded
            .fetch_add(1, Ordering::Relaxed);

        state.entries.insert(key.clone(), Arc::clone(entry));
        if let Some(attempt) = state.attempts.get_mut(key) {
            attempt.status = AttemptStatus::Succeeded;
            attempt.pending = None;
            attempt.retry_count = 0;
            attempt.last_error = None;
        }
        info!(
            area = %key,
            items = entry.items.len(),
            retries,
            "Area fetched"
        );
    }

    fn settle_failure(&self, key: &AreaKey, id: u64, error: FetchError) {
        let mut state = self.state.lock();
        if !state.owns(key, id) {
            return;
        }
        self.counters.fetches_failed.fetch_add(1, Ordering::Relaxed);
        if let Some(attempt) = state.attempts.get_mut(key) {
            attempt.status = AttemptStatus::Failed;
            attempt.pending = None;
            attempt.last_error = Some(error);
        }
    }

    fn record_retry(&self, key: &AreaKey, id: u64, retry_count: u32, error: FetchError) {
        self.counters.retries.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        if !state.owns(key, id) {
            return;
        }
        if let Some(attempt) = state.attempts.get_mut(key) {
            attempt.retry_count = retry_count;
            attempt.last_error = Some(error);
        }
    }
}
