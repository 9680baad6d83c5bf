//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use huginn::{
    AbortSignal, CacheStore, EventEmitter, ExecuteOptions, FetchRequest, Fetcher, Huginn,
    HttpFetcher, OperationOptions, OperationType, PluginContext, PluginExecutor, RequestOptions,
    Response, Result, RetryConfig, Route, Terminal, Throttle, ThrottlePlugin, telemetry,
};

// ============================================================================
// Mocks
// ============================================================================

#[derive(Clone, Default)]
struct SlowFetcher {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Fetcher for SlowFetcher {
    async fn fetch(&self, _request: FetchRequest) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Response::success(200, json!([])))
    }
}

struct NetworkTerminal;

#[async_trait]
impl Terminal for NetworkTerminal {
    async fn call(&self, _ctx: &mut PluginContext) -> Result<Response> {
        Ok(Response::success(200, json!("network")))
    }
}

fn fetch_request(base_url: &str) -> FetchRequest {
    FetchRequest {
        base_url: base_url.to_string(),
        route: Route::get("users"),
        path: vec!["users".to_string()],
        defaults: RequestOptions::new(),
        request: RequestOptions::new(),
        signal: AbortSignal::never(),
    }
}

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

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn successful_request_records_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let response = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
                    .mount(&server)
                    .await;
                HttpFetcher::new()?.fetch(fetch_request(&server.uri())).await
            })
        })
    });
    assert!(response.unwrap().is_success());

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "status", "ok"),
        1,
        "expected 1 successful request"
    );
    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 0);
    assert!(
        has_histogram(&snapshot, telemetry::REQUEST_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn network_failures_record_retries() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let _response = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                HttpFetcher::new()?
                    .retry(
                        RetryConfig::new()
                            .retries(2)
                            .base_delay(Duration::from_millis(1)),
                    )
                    .fetch(fetch_request(&format!("http://127.0.0.1:{port}")))
                    .await
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 2);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "status", "error"),
        1,
        "retries count as one logical request"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn joined_requests_record_dedup_hits() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let fetcher = SlowFetcher::default();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let client = Huginn::builder()
                    .base_url("https://api.test")
                    .fetcher(fetcher.clone())
                    .build()
                    .unwrap();
                let a = client.query(Route::get("users"), RequestOptions::new());
                let b = client.query(Route::get("users"), RequestOptions::new());
                let (ra, rb) = tokio::join!(
                    a.execute(OperationOptions::default(), ExecuteOptions::default()),
                    b.execute(OperationOptions::default(), ExecuteOptions::default()),
                );
                ra.unwrap();
                rb.unwrap();
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::DEDUP_HITS_TOTAL, "operation", "read"),
        1
    );
}

#[test]
fn invalidation_records_one_event() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let client = Huginn::builder()
            .base_url("https://api.test")
            .build()
            .unwrap();
        client.invalidate(&["users".to_string(), "users".to_string()]);
        client.invalidate(&[]);
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::INVALIDATIONS_TOTAL), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn throttled_calls_record_short_circuits() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let executor = PluginExecutor::new(vec![Arc::new(ThrottlePlugin::new())]).unwrap();
                for _ in 0..3 {
                    let mut ctx = PluginContext::new(
                        OperationType::Read,
                        Route::get("feed"),
                        RequestOptions::new(),
                        CacheStore::new(),
                        EventEmitter::new(),
                    )
                    .unwrap();
                    ctx.plugin_options.insert(Throttle(Duration::from_secs(60)));
                    executor
                        .execute_middleware(OperationType::Read, &mut ctx, &NetworkTerminal)
                        .await
                        .unwrap();
                }
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::SHORT_CIRCUITS_TOTAL, "plugin", "throttle"),
        2
    );
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let client = Huginn::builder()
        .base_url("https://api.test")
        .fetcher(SlowFetcher::default())
        .build()
        .unwrap();
    let users = client.query(Route::get("users"), RequestOptions::new());
    users
        .execute(OperationOptions::default(), ExecuteOptions::default())
        .await
        .unwrap();
    client.invalidate(&["users".to_string()]);
}
