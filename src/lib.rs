//! Huginn - request orchestration for API clients
//!
//! Given a logical API call (route, method, options), Huginn deduplicates
//! concurrent requests, keeps a subscribable in-memory cache keyed by a
//! canonical request fingerprint, supports optimistic writes with
//! rollback and tag-based invalidation, and runs every request through a
//! dependency-ordered plugin pipeline.
//!
//! # Query Example
//!
//! ```rust,no_run
//! use huginn::{ExecuteOptions, Huginn, InvalidationMode, RequestOptions, Route};
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let client = Huginn::builder()
//!         .base_url("https://api.example.com")
//!         .builtin_plugins(InvalidationMode::All)
//!         .build()?;
//!
//!     let users = client.query(Route::get("users"), RequestOptions::new().query("page", 1));
//!     users.mount()?;
//!
//!     let response = users.execute(Default::default(), ExecuteOptions::default()).await?;
//!     println!("{:?}", response.data());
//!     Ok(())
//! }
//! ```
//!
//! # Optimistic Write Example
//!
//! ```rust,no_run
//! use huginn::{
//!     Huginn, InvalidationMode, Optimistic, OptimisticTarget, OperationOptions, RequestOptions,
//!     Route,
//! };
//! use serde_json::{Value, json};
//!
//! # async fn demo() -> huginn::Result<()> {
//! let client = Huginn::builder()
//!     .base_url("https://api.example.com")
//!     .builtin_plugins(InvalidationMode::SelfOnly)
//!     .build()?;
//!
//! let create = client.mutation(Route::post("posts"), RequestOptions::new());
//! let append = OptimisticTarget::new("posts", |current: Option<&Value>| {
//!     let mut list = current.and_then(Value::as_array).cloned().unwrap_or_default();
//!     list.push(json!({"id": "pending"}));
//!     Value::Array(list)
//! });
//! create
//!     .trigger(
//!         OperationOptions::new()
//!             .request(RequestOptions::new().json(json!({"title": "hello"})))
//!             .plugin(Optimistic::new(append)),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod fetch;
pub mod key;
pub mod plugin;
pub mod plugins;
pub mod route;
pub mod sync;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use error::{HuginnError, Result};

pub use cache::{CacheEntry, CacheListener, CachePatch, CacheStore, OperationState, PromiseCache};
pub use client::{Client, Huginn, HuginnBuilder};
pub use config::EngineConfig;
pub use controller::{ExecuteOptions, OperationController, OperationOptions, Phase};
pub use events::{Event, EventEmitter, EventKind, Listener, RefetchReason};
pub use fetch::{FetchRequest, Fetcher, HttpFetcher, RetryConfig};
pub use key::create_query_key;
pub use plugin::{LifecyclePhase, Next, Plugin, PluginContext, PluginExecutor, PluginOptions, Terminal};
pub use plugins::{
    Debounce, DebouncePlugin, Invalidate, InvalidateTarget, InvalidationHandle, InvalidationMode,
    InvalidationPlugin, Optimistic, OptimisticPlugin, OptimisticTarget, Polling, PollingPlugin,
    Throttle, ThrottlePlugin,
};
pub use route::{Method, OperationType, Route, generate_tags};
pub use sync::{AbortController, AbortSignal, Semaphore, Subscription};
pub use types::{
    Headers, MultipartField, MultipartValue, RequestBody, RequestError, RequestOptions, Response,
};
pub use version::PKG_VERSION;
