//! Integration tests for the area store.
//!
//! These tests drive the store through scripted backends and verify:
//! - Concurrent callers share one fetch and one outcome
//! - Entries expire exactly at the TTL boundary
//! - Retries are bounded and a failed key recovers on the next request
//! - Invalidation, including while a fetch is in flight
//! - A panicking backend fails the key instead of leaving it in flight
//!
//! Timing-sensitive tests run on paused tokio time.
//!
//! Run with: `cargo test --test store_integration`

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;

use gebiedcache::geo::{BoundingBox, Feature, Geometry};
use gebiedcache::poi::{PoiCategory, PointOfInterest};
use gebiedcache::source::{BoxFuture, GeometrySource, PoiSource, SourceError};
use gebiedcache::store::{
    AreaStore, AttemptStatus, Delay, FetchError, NoDelay, RetryPolicy, StoreConfig, TokioDelay,
};
use gebiedcache::AreaKey;

// ============================================================================
// Scripted Backends
// ============================================================================

type GeometryResult = Result<Option<Feature>, SourceError>;
type PointsResult = Result<Vec<PointOfInterest>, SourceError>;

/// Geometry backend that replays scripted outcomes, then a default.
struct ScriptedGeometry {
    calls: AtomicUsize,
    script: Mutex<VecDeque<GeometryResult>>,
    default: GeometryResult,
    failing_keys: HashSet<String>,
    latency: Duration,
}

impl ScriptedGeometry {
    fn found() -> Self {
        Self::with_default(Ok(Some(area_feature())))
    }

    fn with_default(default: GeometryResult) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            default,
            failing_keys: HashSet::new(),
            latency: Duration::ZERO,
        }
    }

    fn then(self, result: GeometryResult) -> Self {
        self.script.lock().push_back(result);
        self
    }

    fn failing_for(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GeometrySource for ScriptedGeometry {
    fn fetch_geometry<'a>(&'a self, key: &'a AreaKey) -> BoxFuture<'a, GeometryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.failing_keys.contains(key.as_str()) {
            Err(SourceError::Http(format!("no route to {}", key)))
        } else {
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.default.clone())
        };
        let latency = self.latency;
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            result
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Geometry backend whose future panics after `latency`.
struct CrashingGeometry {
    calls: AtomicUsize,
    latency: Duration,
}

impl CrashingGeometry {
    fn after(latency: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            latency,
        }
    }
}

async fn crash(latency: Duration) -> GeometryResult {
    tokio::time::sleep(latency).await;
    panic!("geometry decoder crashed");
}

impl GeometrySource for CrashingGeometry {
    fn fetch_geometry<'a>(&'a self, _key: &'a AreaKey) -> BoxFuture<'a, GeometryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(crash(self.latency))
    }

    fn name(&self) -> &str {
        "crashing"
    }
}

/// Points backend that replays scripted outcomes, then a default.
struct ScriptedPoints {
    calls: AtomicUsize,
    script: Mutex<VecDeque<PointsResult>>,
    default: PointsResult,
}

impl ScriptedPoints {
    fn returning(items: Vec<PointOfInterest>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            default: Ok(items),
        }
    }

    fn then(self, result: PointsResult) -> Self {
        self.script.lock().push_back(result);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PoiSource for ScriptedPoints {
    fn fetch_points<'a>(&'a self, _bbox: &'a BoundingBox) -> BoxFuture<'a, PointsResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        Box::pin(async move { result })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A small polygon in Amsterdam-Centrum.
fn area_feature() -> Feature {
    Feature::from_geometry(Geometry::Polygon {
        coordinates: vec![vec![
            vec![4.885, 52.370],
            vec![4.895, 52.370],
            vec![4.895, 52.375],
            vec![4.885, 52.375],
            vec![4.885, 52.370],
        ]],
    })
}

fn item(id: &str, category: PoiCategory) -> PointOfInterest {
    PointOfInterest::new(id, category, 52.372, 4.890, BTreeMap::new())
}

fn two_items() -> Vec<PointOfInterest> {
    vec![
        item("node-a", PoiCategory::Supermarket),
        item("node-b", PoiCategory::PrimarySchool),
    ]
}

fn transient() -> SourceError {
    SourceError::Http("connection reset".to_string())
}

fn build_store(
    config: StoreConfig,
    geometry: &Arc<ScriptedGeometry>,
    points: &Arc<ScriptedPoints>,
    delay: Arc<dyn Delay>,
) -> AreaStore {
    AreaStore::with_delay(config, geometry.clone(), points.clone(), delay)
}

fn instant_store(
    config: StoreConfig,
    geometry: &Arc<ScriptedGeometry>,
    points: &Arc<ScriptedPoints>,
) -> AreaStore {
    build_store(config, geometry, points, Arc::new(NoDelay))
}

// ============================================================================
// Deduplication
// ============================================================================

/// Many concurrent callers for one cold key trigger exactly one fetch and
/// all receive the same entry.
#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_fetch() {
    let geometry = Arc::new(ScriptedGeometry::found().with_latency(Duration::from_millis(100)));
    let points = Arc::new(ScriptedPoints::returning(two_items()));
    let store = instant_store(StoreConfig::default(), &geometry, &points);
    let key = AreaKey::new("BU03630000");

    let results = join_all((0..10).map(|_| store.ensure(&key))).await;

    let entries: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
    assert_eq!(geometry.calls(), 1);
    assert_eq!(points.calls(), 1);

    let stats = store.stats();
    assert_eq!(stats.misses, 10);
    assert_eq!(stats.joins, 9);
    assert_eq!(stats.fetches_started, 1);
}

/// Joined callers observe the same terminal error.
#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_failure() {
    let geometry = Arc::new(
        ScriptedGeometry::with_default(Err(transient())).with_latency(Duration::from_millis(50)),
    );
    let points = Arc::new(ScriptedPoints::returning(vec![]));
    let store = instant_store(StoreConfig::default().with_max_retries(1), &geometry, &points);
    let key = AreaKey::new("WK036300");

    let results = join_all((0..5).map(|_| store.ensure(&key))).await;

    let errors: Vec<FetchError> = results.into_iter().map(|r| r.unwrap_err()).collect();
    assert!(errors.iter().all(|e| *e == errors[0]));
    assert!(matches!(errors[0], FetchError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(geometry.calls(), 2);
    assert_eq!(points.calls(), 0);
}

/// Different keys fetch independently; one failing does not affect another.
#[tokio::test(start_paused = true)]
async fn test_independent_keys() {
    let geometry = Arc::new(
        ScriptedGeometry::found()
            .failing_for("BU00000002")
            .with_latency(Duration::from_millis(20)),
    );
    let points = Arc::new(ScriptedPoints::returning(two_items()));
    let store = instant_store(StoreConfig::default().with_max_retries(0), &geometry, &points);
    let good = AreaKey::new("BU00000001");
    let bad = AreaKey::new("BU00000002");

    let (good_result, bad_result) = tokio::join!(store.ensure(&good), store.ensure(&bad));

    assert!(good_result.is_ok());
    assert!(bad_result.is_err());
    assert_eq!(store.status_of(&good), AttemptStatus::Succeeded);
    assert_eq!(store.status_of(&bad), AttemptStatus::Failed);
    assert_eq!(geometry.calls(), 2);

    store.invalidate(&bad);
    assert!(store.peek(&good).is_some());
}

// ============================================================================
// Expiry
// ============================================================================

/// An entry is served strictly before `fetched_at + ttl` and refetched at it.
#[tokio::test(start_paused = true)]
async fn test_ttl_boundary() {
    let geometry = Arc::new(ScriptedGeometry::found());
    let points = Arc::new(ScriptedPoints::returning(two_items()));
    let config = StoreConfig::default().with_ttl(Duration::from_millis(1000));
    let store = instant_store(config, &geometry, &points);
    let key = AreaKey::new("BU001");

    let first = store.ensure(&key).await.unwrap();

    tokio::time::sleep_until(first.fetched_at + Duration::from_millis(999)).await;
    assert!(store.peek(&key).is_some());
    let cached = store.ensure(&key).await.unwrap();
    assert!(Arc::ptr_eq(&first, &cached));
    assert_eq!(geometry.calls(), 1);

    tokio::time::sleep_until(first.fetched_at + Duration::from_millis(1000)).await;
    assert!(store.peek(&key).is_none());
    let refreshed = store.ensure(&key).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &refreshed));
    assert_eq!(geometry.calls(), 2);
    assert_eq!(store.stats().hits, 1);
}

// ============================================================================
// Retry
// ============================================================================

/// A persistently failing backend is called `max_retries + 1` times.
#[tokio::test]
async fn test_bounded_retry_then_failed() {
    let geometry = Arc::new(ScriptedGeometry::with_default(Err(transient())));
    let points = Arc::new(ScriptedPoints::returning(two_items()));
    let store = instant_store(StoreConfig::default(), &geometry, &points);
    let key = AreaKey::new("GM0363");

    let err = store.ensure(&key).await.unwrap_err();

    assert_eq!(geometry.calls(), 3);
    assert!(matches!(err, FetchError::RetriesExhausted { attempts: 3, .. }));
    assert!(matches!(err.root_cause(), FetchError::GeometryLookupFailed { .. }));

    let info = store.attempt_info(&key).unwrap();
    assert_eq!(info.status, AttemptStatus::Failed);
    assert_eq!(info.retry_count, 2);
    assert_eq!(info.last_error, Some(err));
    assert!(store.peek(&key).is_none());
}

/// A failed key is not poisoned; the next request starts a fresh sequence.
#[tokio::test]
async fn test_recovery_after_failure() {
    let geometry = Arc::new(
        ScriptedGeometry::found()
            .then(Err(transient()))
            .then(Err(transient())),
    );
    let points = Arc::new(ScriptedPoints::returning(two_items()));
    let store = instant_store(StoreConfig::default().with_max_retries(1), &geometry, &points);
    let key = AreaKey::new("BU001");

    assert!(store.ensure(&key).await.is_err());
    assert_eq!(store.status_of(&key), AttemptStatus::Failed);

    let entry = store.ensure(&key).await.unwrap();
    assert_eq!(entry.items.len(), 2);
    assert_eq!(geometry.calls(), 3);

    let info = store.attempt_info(&key).unwrap();
    assert_eq!(info.status, AttemptStatus::Succeeded);
    assert_eq!(info.retry_count, 0);
    assert_eq!(info.last_error, None);
}

/// A points-of-interest failure is retried within the same sequence.
#[tokio::test]
async fn test_points_failure_is_retried() {
    let geometry = Arc::new(ScriptedGeometry::found());
    let points = Arc::new(
        ScriptedPoints::returning(two_items()).then(Err(SourceError::Status {
            status: 429,
            url: "https://overpass.test/api".to_string(),
        })),
    );
    let store = instant_store(StoreConfig::default(), &geometry, &points);

    let entry = store.ensure(&AreaKey::new("BU001")).await.unwrap();

    assert_eq!(entry.items, two_items());
    assert_eq!(geometry.calls(), 2);
    assert_eq!(points.calls(), 2);
    assert_eq!(store.stats().retries, 1);
}

/// Missing geometry uses the retry budget unless configured to fail fast.
#[tokio::test]
async fn test_missing_geometry_retry_setting() {
    let points = Arc::new(ScriptedPoints::returning(two_items()));
    let key = AreaKey::new("BU99999999");

    let geometry = Arc::new(ScriptedGeometry::with_default(Ok(None)));
    let store = instant_store(StoreConfig::default(), &geometry, &points);
    let err = store.ensure(&key).await.unwrap_err();
    assert!(err.is_geometry_missing());
    assert_eq!(geometry.calls(), 3);

    let geometry = Arc::new(ScriptedGeometry::with_default(Ok(None)));
    let config = StoreConfig::default().with_retry_missing_geometry(false);
    let store = instant_store(config, &geometry, &points);
    let err = store.ensure(&key).await.unwrap_err();
    assert!(matches!(err, FetchError::RetriesExhausted { attempts: 1, .. }));
    assert_eq!(geometry.calls(), 1);
    assert_eq!(points.calls(), 0);
}

/// Default linear backoff waits 1s then 2s between attempts.
#[tokio::test(start_paused = true)]
async fn test_linear_backoff_timing() {
    let geometry = Arc::new(ScriptedGeometry::with_default(Err(transient())));
    let points = Arc::new(ScriptedPoints::returning(vec![]));
    let store = build_store(StoreConfig::default(), &geometry, &points, Arc::new(TokioDelay));

    let start = Instant::now();
    assert!(store.ensure(&AreaKey::new("BU001")).await.is_err());
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
}

/// Retry progress is visible while the sequence is still running.
#[tokio::test(start_paused = true)]
async fn test_retry_progress_visible_in_flight() {
    let geometry = Arc::new(ScriptedGeometry::with_default(Err(transient())));
    let points = Arc::new(ScriptedPoints::returning(vec![]));
    let config = StoreConfig::default().with_retry(RetryPolicy::linear(2, Duration::from_secs(1)));
    let store = build_store(config, &geometry, &points, Arc::new(TokioDelay));
    let key = AreaKey::new("BU001");

    let task = {
        let store = store.clone();
        let key = key.clone();
        tokio::spawn(async move { store.ensure(&key).await })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    let info = store.attempt_info(&key).unwrap();
    assert_eq!(info.status, AttemptStatus::InFlight);
    assert_eq!(info.retry_count, 1);
    assert!(matches!(
        info.last_error,
        Some(FetchError::GeometryLookupFailed { .. })
    ));

    assert!(task.await.unwrap().is_err());
    assert_eq!(store.status_of(&key), AttemptStatus::Failed);
}

/// The scenario from the store's design notes: one transient geometry
/// failure, then success within the retry budget.
#[tokio::test(start_paused = true)]
async fn test_single_retry_recovers_area() {
    let geometry = Arc::new(ScriptedGeometry::found().then(Err(transient())));
    let points = Arc::new(ScriptedPoints::returning(two_items()));
    let config = StoreConfig::default()
        .with_ttl(Duration::from_millis(1000))
        .with_max_retries(1);
    let store = build_store(config, &geometry, &points, Arc::new(TokioDelay));
    let key = AreaKey::new("BU001");

    let start = Instant::now();
    let entry = store.ensure(&key).await.unwrap();

    let ids: Vec<&str> = entry.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["node-a", "node-b"]);
    assert_eq!(geometry.calls(), 2);
    assert_eq!(store.status_of(&key), AttemptStatus::Succeeded);
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(entry.bbox.contains(52.372, 4.890));
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let geometry = Arc::new(ScriptedGeometry::found());
    let points = Arc::new(ScriptedPoints::returning(two_items()));
    let store = instant_store(StoreConfig::default(), &geometry, &points);
    let key = AreaKey::new("BU001");
    let other = AreaKey::new("BU002");

    store.ensure(&key).await.unwrap();
    store.ensure(&other).await.unwrap();
    store.invalidate(&key);

    assert!(store.peek(&key).is_none());
    assert_eq!(store.status_of(&key), AttemptStatus::Idle);
    assert!(store.attempt_info(&key).is_none());
    assert!(store.peek(&other).is_some());

    store.ensure(&key).await.unwrap();
    assert_eq!(geometry.calls(), 3);
}

/// A fetch in flight during invalidation still answers its callers but does
/// not repopulate the cache.
#[tokio::test(start_paused = true)]
async fn test_invalidate_during_flight_is_not_cached() {
    let geometry = Arc::new(ScriptedGeometry::found().with_latency(Duration::from_millis(100)));
    let points = Arc::new(ScriptedPoints::returning(two_items()));
    let store = instant_store(StoreConfig::default(), &geometry, &points);
    let key = AreaKey::new("BU001");

    let task = {
        let store = store.clone();
        let key = key.clone();
        tokio::spawn(async move { store.ensure(&key).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.status_of(&key), AttemptStatus::InFlight);
    store.invalidate(&key);

    let entry = task.await.unwrap().unwrap();
    assert_eq!(entry.items.len(), 2);
    assert!(store.peek(&key).is_none());
    assert_eq!(store.status_of(&key), AttemptStatus::Idle);
    assert_eq!(store.stats().fetches_started, 1);
    assert_eq!(store.stats().fetches_succeeded, 0);

    store.ensure(&key).await.unwrap();
    assert_eq!(geometry.calls(), 2);
    assert!(store.peek(&key).is_some());
    assert_eq!(store.stats().fetches_started, 2);
    assert_eq!(store.stats().fetches_succeeded, 1);
}

/// The fetch runs to completion even if the caller stops waiting.
#[tokio::test(start_paused = true)]
async fn test_dropped_caller_does_not_cancel_fetch() {
    let geometry = Arc::new(ScriptedGeometry::found().with_latency(Duration::from_millis(100)));
    let points = Arc::new(ScriptedPoints::returning(two_items()));
    let store = instant_store(StoreConfig::default(), &geometry, &points);
    let key = AreaKey::new("BU001");

    let task = {
        let store = store.clone();
        let key = key.clone();
        tokio::spawn(async move { store.ensure(&key).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    task.abort();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.status_of(&key), AttemptStatus::Succeeded);
    assert!(store.peek(&key).is_some());
    assert_eq!(geometry.calls(), 1);
}

// ============================================================================
// Crashing Backend
// ============================================================================

fn crashing_store(geometry: &Arc<CrashingGeometry>) -> AreaStore {
    AreaStore::with_delay(
        StoreConfig::default(),
        geometry.clone(),
        Arc::new(ScriptedPoints::returning(two_items())),
        Arc::new(NoDelay),
    )
}

fn assert_aborted(error: &FetchError, key: &AreaKey) {
    match error {
        FetchError::Aborted { key: failed, reason } => {
            assert_eq!(failed, key);
            assert!(reason.contains("geometry decoder crashed"), "reason: {}", reason);
        }
        other => panic!("expected Aborted, got {:?}", other),
    }
}

/// Waiting callers get `Aborted` and the key is left `Failed`, not stuck.
#[tokio::test(start_paused = true)]
async fn test_backend_panic_fails_joined_callers() {
    let geometry = Arc::new(CrashingGeometry::after(Duration::from_millis(50)));
    let store = crashing_store(&geometry);
    let key = AreaKey::new("BU001");

    let results = join_all((0..3).map(|_| store.ensure(&key))).await;

    for result in &results {
        assert_aborted(result.as_ref().unwrap_err(), &key);
    }
    assert_eq!(geometry.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.status_of(&key), AttemptStatus::Failed);
    let info = store.attempt_info(&key).unwrap();
    assert_aborted(info.last_error.as_ref().unwrap(), &key);
    assert_eq!(store.stats().fetches_failed, 1);
}

/// With nobody waiting, the panicked fetch still marks the key `Failed`.
#[tokio::test(start_paused = true)]
async fn test_backend_panic_without_caller_marks_failed() {
    let geometry = Arc::new(CrashingGeometry::after(Duration::from_millis(50)));
    let store = crashing_store(&geometry);
    let key = AreaKey::new("BU001");

    let task = {
        let store = store.clone();
        let key = key.clone();
        tokio::spawn(async move { store.ensure(&key).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.status_of(&key), AttemptStatus::InFlight);
    task.abort();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(store.status_of(&key), AttemptStatus::Failed);
    let info = store.attempt_info(&key).unwrap();
    assert_aborted(info.last_error.as_ref().unwrap(), &key);

    // The next request starts a fresh sequence instead of joining a dead one.
    let error = store.ensure(&key).await.unwrap_err();
    assert_aborted(&error, &key);
    assert_eq!(geometry.calls.load(Ordering::SeqCst), 2);
}
