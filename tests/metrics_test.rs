//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

use portcullis::sanitize;
use portcullis::telemetry;
use portcullis::{
    AdmissionRequest, CacheStore, FailurePolicy, LimiterConfig, Portcullis, Quota, RateLimiter,
};

mod common;
use common::FailingBackend;

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Sum counter values for `name` carrying the label `label=value`.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
fn record<F: Future>(recorder: &DebuggingRecorder, fut: F) -> F::Output {
    metrics::with_local_recorder(recorder, || {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    })
}

fn snapshot(snapshotter: &Snapshotter) -> SnapshotVec {
    snapshotter.snapshot().into_vec()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn admission_records_outcome_and_duration() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, async {
        let gateway = Portcullis::builder()
            .cache_store(Arc::new(CacheStore::in_memory()))
            .quota("generation", Quota::new(1, 60))
            .build()
            .await
            .unwrap();
        let request = AdmissionRequest::new("user-1", "generation").topic("Rust lifetimes");
        assert!(gateway.admit(&request).await.is_ok());
        assert!(gateway.admit(&request).await.is_err());
        let invalid = AdmissionRequest::new("user-1", "generation").topic("");
        assert!(gateway.admit(&invalid).await.is_err());
    });

    let snapshot = snapshot(&snapshotter);
    assert_eq!(counter_total(&snapshot, telemetry::ADMISSIONS_TOTAL), 3);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::ADMISSIONS_TOTAL, "outcome", "admitted"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::ADMISSIONS_TOTAL, "outcome", "rate_limited"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::ADMISSIONS_TOTAL, "outcome", "invalid"),
        1
    );
    assert!(
        has_histogram(&snapshot, telemetry::ADMISSION_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn admission_after_shutdown_is_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, async {
        let gateway = Portcullis::builder()
            .cache_store(Arc::new(CacheStore::in_memory()))
            .build()
            .await
            .unwrap();
        gateway.shutdown().await;
        let request = AdmissionRequest::new("user-1", "generation").topic("Rust lifetimes");
        assert!(gateway.admit(&request).await.is_err());
    });

    let snapshot = snapshot(&snapshotter);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::ADMISSIONS_TOTAL, "outcome", "shut_down"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn moderation_memo_records_hits_and_misses() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, async {
        let gateway = Portcullis::builder()
            .cache_store(Arc::new(CacheStore::in_memory()))
            .build()
            .await
            .unwrap();
        gateway.moderate("same text").await;
        gateway.moderate("same text").await;
    });

    let snapshot = snapshot(&snapshotter);
    assert_eq!(counter_total(&snapshot, telemetry::MODERATION_MEMO_MISSES_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::MODERATION_MEMO_HITS_TOTAL), 1);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::MODERATION_RESULTS_TOTAL, "risk_level", "safe"),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn rate_decisions_are_counted_by_outcome() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, async {
        let limiter = RateLimiter::new(Arc::new(CacheStore::in_memory()), LimiterConfig::new());
        for _ in 0..3 {
            limiter
                .check("user-1", "generation", 2, Duration::from_secs(60))
                .await;
        }
    });

    let snapshot = snapshot(&snapshotter);
    let decisions = telemetry::RATE_LIMIT_DECISIONS_TOTAL;
    assert_eq!(counter_with_label(&snapshot, decisions, "outcome", "allowed"), 2);
    assert_eq!(counter_with_label(&snapshot, decisions, "outcome", "rejected"), 1);
    assert_eq!(
        counter_with_label(&snapshot, decisions, "algorithm", "sliding_window"),
        3
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn cache_failure_records_soft_failure_and_fallback() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let decision = record(&recorder, async {
        let cache = Arc::new(CacheStore::with_backend(Arc::new(FailingBackend)));
        let limiter = RateLimiter::new(
            cache,
            LimiterConfig::new().failure_policy(FailurePolicy::Closed),
        );
        limiter
            .check("user-1", "generation", 5, Duration::from_secs(60))
            .await
    });
    assert!(decision.degraded);

    let snapshot = snapshot(&snapshotter);
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::CACHE_SOFT_FAILURES_TOTAL,
            "operation",
            "admit_window"
        ),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::RATE_LIMIT_FALLBACKS_TOTAL, "policy", "closed"),
        1
    );
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::RATE_LIMIT_DECISIONS_TOTAL,
            "outcome",
            "degraded"
        ),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn sanitizer_rejections_are_counted_by_reason() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, async {
        assert!(sanitize::sanitize_topic("   ").is_err());
        assert!(sanitize::sanitize_email("nope").is_err());
        assert!(sanitize::sanitize_topic("fine").is_ok());
    });

    let snapshot = snapshot(&snapshotter);
    let rejections = telemetry::SANITIZER_REJECTIONS_TOTAL;
    assert_eq!(counter_total(&snapshot, rejections), 2);
    assert_eq!(counter_with_label(&snapshot, rejections, "reason", "empty"), 1);
    assert_eq!(counter_with_label(&snapshot, rejections, "reason", "format"), 1);
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let gateway = Portcullis::builder()
        .cache_store(Arc::new(CacheStore::in_memory()))
        .build()
        .await
        .unwrap();
    let request = AdmissionRequest::new("user-1", "generation").topic("hello");
    gateway.admit(&request).await.unwrap();
}
