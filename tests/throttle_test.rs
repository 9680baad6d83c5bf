use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use huginn::{
    Client, ExecuteOptions, FetchRequest, Fetcher, Huginn, InvalidationMode, OperationController,
    OperationOptions, RequestOptions, Response, Result, Route, Throttle, ThrottlePlugin,
};

#[derive(Clone, Default)]
struct CountingApi {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Fetcher for CountingApi {
    async fn fetch(&self, request: FetchRequest) -> Result<Response> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Response::success(
            200,
            json!({"call": n, "path": request.path.join("/")}),
        ))
    }
}

impl CountingApi {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn builtin_client(api: &CountingApi) -> Client {
    Huginn::builder()
        .base_url("https://api.test")
        .builtin_plugins(InvalidationMode::All)
        .fetcher(api.clone())
        .build()
        .unwrap()
}

async fn run(controller: &OperationController) -> Response {
    controller
        .execute(OperationOptions::default(), ExecuteOptions::default())
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn calls_inside_the_window_serve_cached_data() {
    let api = CountingApi::default();
    let client = builtin_client(&api);
    let feed = client.query(
        Route::get("feed"),
        OperationOptions::new().plugin(Throttle(Duration::from_secs(1))),
    );

    assert_eq!(run(&feed).await.data(), Some(&json!({"call": 1, "path": "feed"})));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(run(&feed).await.data(), Some(&json!({"call": 1, "path": "feed"})));
    assert_eq!(
        feed.refetch().await.unwrap().data(),
        Some(&json!({"call": 1, "path": "feed"})),
        "forced calls are throttled too"
    );
    assert_eq!(api.calls(), 1);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(run(&feed).await.data(), Some(&json!({"call": 2, "path": "feed"})));
}

#[tokio::test(start_paused = true)]
async fn suppressed_calls_do_not_extend_the_window() {
    let api = CountingApi::default();
    let client = builtin_client(&api);
    let feed = client.query(
        Route::get("feed"),
        OperationOptions::new().plugin(Throttle(Duration::from_millis(500))),
    );

    run(&feed).await;
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        run(&feed).await;
    }
    assert_eq!(api.calls(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    run(&feed).await;
    assert_eq!(api.calls(), 2, "window measured from the last call that went through");
}

#[tokio::test(start_paused = true)]
async fn window_is_per_endpoint() {
    let api = CountingApi::default();
    let client = builtin_client(&api);
    let window = Throttle(Duration::from_secs(5));

    let users = client.query(Route::get("users"), OperationOptions::new().plugin(window));
    let orders = client.query(Route::get("orders"), OperationOptions::new().plugin(window));
    run(&users).await;
    run(&orders).await;
    assert_eq!(api.calls(), 2);

    // Same endpoint with a new key: still throttled, nothing cached yet.
    let user = client.query(
        Route::get("users"),
        OperationOptions::new()
            .request(RequestOptions::new().query("page", 2))
            .plugin(window),
    );
    let response = run(&user).await;
    assert_eq!(response.status, 0);
    assert_eq!(api.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn plugin_default_window() {
    let api = CountingApi::default();
    let client = Huginn::builder()
        .base_url("https://api.test")
        .plugin(ThrottlePlugin::with_default(Duration::from_secs(1)))
        .fetcher(api.clone())
        .build()
        .unwrap();
    let feed = client.query(Route::get("feed"), RequestOptions::new());

    run(&feed).await;
    run(&feed).await;
    assert_eq!(api.calls(), 1);

    let unthrottled = client.query(
        Route::get("feed"),
        OperationOptions::new().plugin(Throttle(Duration::ZERO)),
    );
    run(&unthrottled).await;
    assert_eq!(api.calls(), 2);
}
