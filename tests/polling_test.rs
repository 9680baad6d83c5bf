use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use huginn::{
    Client, ExecuteOptions, FetchRequest, Fetcher, Huginn, OperationOptions, Polling,
    PollingPlugin, RequestError, RequestOptions, Response, Result, Route,
};

/// Answers `{"call": n}`; fails every call listed in `failing`.
#[derive(Clone, Default)]
struct JobApi {
    calls: Arc<AtomicUsize>,
    failing: &'static [usize],
}

#[async_trait]
impl Fetcher for JobApi {
    async fn fetch(&self, _request: FetchRequest) -> Result<Response> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.contains(&n) {
            return Ok(Response::failure(RequestError::Http {
                status: 500,
                body: Value::Null,
            }));
        }
        Ok(Response::success(200, json!({"call": n})))
    }
}

impl JobApi {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn client(api: &JobApi, polling: Arc<PollingPlugin>) -> Client {
    Huginn::builder()
        .base_url("https://api.test")
        .plugin_arc(polling)
        .fetcher(api.clone())
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn fixed_interval_refetches_while_mounted() {
    let api = JobApi::default();
    let polling = Arc::new(PollingPlugin::new());
    let client = client(&api, polling.clone());

    let job = client.query(
        Route::get("jobs/1"),
        OperationOptions::new().plugin(Polling::Every(Duration::from_secs(1))),
    );
    job.mount().unwrap();
    job.execute(OperationOptions::default(), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(polling.scheduled(), vec![job.query_key().unwrap()]);

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(api.calls(), 4);
    assert_eq!(job.state().data, Some(json!({"call": 4})));

    job.unmount().unwrap();
    assert!(polling.scheduled().is_empty());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(api.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn dynamic_interval_sees_data_and_errors() {
    let api = JobApi {
        failing: &[2],
        ..JobApi::default()
    };
    let polling = Arc::new(PollingPlugin::new());
    let client = client(&api, polling.clone());

    // Back off after an error, stop once the third call succeeds.
    let interval = Polling::dynamic(|data: Option<&Value>, error: Option<&RequestError>| {
        if error.is_some() {
            return Some(Duration::from_secs(5));
        }
        match data.and_then(|d| d["call"].as_u64()) {
            Some(n) if n >= 3 => None,
            _ => Some(Duration::from_secs(1)),
        }
    });
    let job = client.query(Route::get("jobs/2"), OperationOptions::new().plugin(interval));
    job.mount().unwrap();
    job.execute(OperationOptions::default(), ExecuteOptions::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(api.calls(), 2, "second call fails at t=1s");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(api.calls(), 2, "backing off until t=6s");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(api.calls(), 3);
    assert!(polling.scheduled().is_empty(), "stopped after the third call");

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(api.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn key_change_moves_the_timer() {
    let api = JobApi::default();
    let polling = Arc::new(PollingPlugin::new());
    let client = client(&api, polling.clone());

    let every = || Polling::Every(Duration::from_secs(2));
    let job = client.query(
        Route::get("jobs/:id"),
        OperationOptions::new()
            .request(RequestOptions::new().param("id", 1))
            .plugin(every()),
    );
    job.mount().unwrap();
    job.execute(OperationOptions::default(), ExecuteOptions::default())
        .await
        .unwrap();
    let first_key = job.query_key().unwrap();

    job.update(
        OperationOptions::new()
            .request(RequestOptions::new().param("id", 2))
            .plugin(every()),
    )
    .unwrap();
    let second_key = job.query_key().unwrap();
    assert_ne!(first_key, second_key);
    assert_eq!(polling.scheduled(), vec![second_key.clone()]);

    job.execute(OperationOptions::default(), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(polling.scheduled(), vec![second_key]);
}

#[tokio::test(start_paused = true)]
async fn unmounted_controllers_do_not_poll() {
    let api = JobApi::default();
    let client = client(&api, Arc::new(PollingPlugin::new()));

    let job = client.query(
        Route::get("jobs/3"),
        OperationOptions::new().plugin(Polling::Every(Duration::from_secs(1))),
    );
    job.execute(OperationOptions::default(), ExecuteOptions::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(api.calls(), 1, "timer fires but nobody listens for the key");
}
