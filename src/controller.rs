//! Operation controller.
//!
//! One [`OperationController`] drives one logical query or mutation:
//! it resolves the cache key, deduplicates against in-flight requests,
//! runs the plugin chain around the core fetch, and exposes the cached
//! state to hook adapters.
//!
//! # Execution flow
//!
//! ```text
//! execute(overrides)
//!    │ resolve key
//!    ├── pending request for key? ──► await it (dedup, atomic join-or-register)
//!    │
//!    ▼ spawn pipeline
//! plugin middleware ──► CoreFetch ──► Fetcher
//!    │                     │ persist data / error / timestamp
//!    ▼                     ▼
//! after_response     cache subscribers notified
//! ```
//!
//! The pipeline runs on its own task, so it completes (and commits to the
//! cache) even when every caller stops waiting. Switching the controller
//! to another key never cancels a previous key's request.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheListener, CachePatch, CacheStore, OperationState};
use crate::events::{Event, EventEmitter, EventKind, RefetchReason};
use crate::fetch::{FetchRequest, Fetcher};
use crate::plugin::{LifecyclePhase, PluginContext, PluginExecutor, PluginOptions, Terminal};
use crate::route::{OperationType, Route};
use crate::sync::{AbortController, AbortSignal, Semaphore, Subscription, mutex_lock};
use crate::telemetry;
use crate::types::{RequestError, RequestOptions, Response};
use crate::{HuginnError, Result};

const SOURCE: &str = "controller";

/// Collaborators shared by every controller of one client.
pub(crate) struct Engine {
    pub base_url: String,
    pub defaults: RequestOptions,
    pub store: CacheStore,
    pub events: EventEmitter,
    pub executor: PluginExecutor,
    pub fetcher: Arc<dyn Fetcher>,
    pub semaphore: Option<Arc<Semaphore>>,
    pub promise_timeout: Duration,
}

/// Request options plus per-call plugin options.
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    pub request: RequestOptions,
    pub plugins: PluginOptions,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    /// Add a plugin option value (see each plugin's option types).
    pub fn plugin<T: std::any::Any + Send + Sync>(mut self, value: T) -> Self {
        self.plugins.insert(value);
        self
    }

    /// `self` with `overrides` layered on top.
    pub fn merge(&self, overrides: &OperationOptions) -> OperationOptions {
        OperationOptions {
            request: self.request.merge(&overrides.request),
            plugins: self.plugins.merge(&overrides.plugins),
        }
    }
}

impl From<RequestOptions> for OperationOptions {
    fn from(request: RequestOptions) -> Self {
        Self {
            request,
            plugins: PluginOptions::new(),
        }
    }
}

/// Flags for a single [`OperationController::execute`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Skip dedup and any cached-data short-circuit.
    pub force: bool,
}

impl ExecuteOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Last settled outcome of a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Fetching,
    Success,
    Error,
}

struct ControllerState {
    options: OperationOptions,
    phase: Phase,
    abort: Option<AbortController>,
    listeners: Vec<Subscription>,
}

struct Inner {
    engine: Arc<Engine>,
    route: Route,
    operation: OperationType,
    state: Mutex<ControllerState>,
}

/// Cheap-clone handle driving one logical query or mutation.
#[derive(Clone)]
pub struct OperationController {
    inner: Arc<Inner>,
}

impl OperationController {
    pub(crate) fn new(
        engine: Arc<Engine>,
        route: Route,
        operation: OperationType,
        options: OperationOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                route,
                operation,
                state: Mutex::new(ControllerState {
                    options,
                    phase: Phase::Idle,
                    abort: None,
                    listeners: Vec::new(),
                }),
            }),
        }
    }

    pub fn route(&self) -> &Route {
        &self.inner.route
    }

    pub fn operation(&self) -> OperationType {
        self.inner.operation
    }

    pub fn phase(&self) -> Phase {
        mutex_lock(&self.inner.state, SOURCE, "phase").phase
    }

    pub fn options(&self) -> OperationOptions {
        mutex_lock(&self.inner.state, SOURCE, "options")
            .options
            .clone()
    }

    fn context(&self, overrides: &OperationOptions) -> Result<PluginContext> {
        let options = self.options().merge(overrides);
        let engine = &self.inner.engine;
        Ok(PluginContext::new(
            self.inner.operation,
            self.inner.route.clone(),
            options.request,
            engine.store.clone(),
            engine.events.clone(),
        )?
        .with_plugin_options(options.plugins))
    }

    /// Cache key for the controller's current options.
    pub fn query_key(&self) -> Result<String> {
        Ok(self.context(&OperationOptions::default())?.query_key)
    }

    /// Tags for the controller's current options.
    pub fn tags(&self) -> Result<Vec<String>> {
        Ok(self.context(&OperationOptions::default())?.tags)
    }

    /// Cached state for the current key; the default state when nothing
    /// is cached yet.
    pub fn state(&self) -> OperationState {
        self.query_key()
            .ok()
            .and_then(|key| self.inner.engine.store.get_cache(&key))
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Observe writes to the current key's cache entry.
    pub fn subscribe(&self, listener: CacheListener) -> Result<Subscription> {
        let key = self.query_key()?;
        Ok(self.inner.engine.store.subscribe_cache(&key, listener))
    }

    /// Start reacting to `refetch` and `invalidate` events, then fire
    /// `on_mount`. Mounting twice is a no-op.
    pub fn mount(&self) -> Result<()> {
        let mut ctx = self.context(&OperationOptions::default())?;
        if !mutex_lock(&self.inner.state, SOURCE, "mount")
            .listeners
            .is_empty()
        {
            return Ok(());
        }

        let events = &self.inner.engine.events;
        let mut listeners = Vec::with_capacity(2);

        let weak = Arc::downgrade(&self.inner);
        listeners.push(events.on(
            EventKind::Refetch,
            Arc::new(move |event| {
                if let Event::Refetch { query_key, reason } = event {
                    refetch_if(&weak, *reason, |controller| {
                        controller.query_key().ok().as_ref() == Some(query_key)
                    });
                }
            }),
        ));

        if self.inner.operation == OperationType::Read {
            let weak = Arc::downgrade(&self.inner);
            listeners.push(events.on(
                EventKind::Invalidate,
                Arc::new(move |event| {
                    if let Event::Invalidate(tags) = event {
                        refetch_if(&weak, RefetchReason::Invalidated, |controller| {
                            controller
                                .tags()
                                .is_ok_and(|own| own.iter().any(|t| tags.contains(t)))
                        });
                    }
                }),
            ));
        }

        mutex_lock(&self.inner.state, SOURCE, "mount").listeners = listeners;
        self.inner.engine.executor.execute_lifecycle(
            LifecyclePhase::Mount,
            self.inner.operation,
            &mut ctx,
        )
    }

    /// Stop reacting to events and fire `on_unmount`.
    pub fn unmount(&self) -> Result<()> {
        let listeners = std::mem::take(
            &mut mutex_lock(&self.inner.state, SOURCE, "unmount").listeners,
        );
        for listener in listeners {
            listener.unsubscribe();
        }
        let mut ctx = self.context(&OperationOptions::default())?;
        self.inner.engine.executor.execute_lifecycle(
            LifecyclePhase::Unmount,
            self.inner.operation,
            &mut ctx,
        )
    }

    pub fn is_mounted(&self) -> bool {
        !mutex_lock(&self.inner.state, SOURCE, "is_mounted")
            .listeners
            .is_empty()
    }

    /// Replace the controller's options and fire `on_update` with the
    /// previous context. Listeners follow the new key and tags.
    pub fn update(&self, options: OperationOptions) -> Result<()> {
        let prev = self.context(&OperationOptions::default())?;
        let engine = &self.inner.engine;
        let mut ctx = PluginContext::new(
            self.inner.operation,
            self.inner.route.clone(),
            options.request.clone(),
            engine.store.clone(),
            engine.events.clone(),
        )?
        .with_plugin_options(options.plugins.clone());

        mutex_lock(&self.inner.state, SOURCE, "update").options = options;
        engine
            .executor
            .execute_update_lifecycle(self.inner.operation, &mut ctx, &prev)
    }

    /// Run the operation.
    ///
    /// Resolves to a [`Response`] for every HTTP or network outcome;
    /// returns `Err` only for configuration problems and plugin failures.
    #[instrument(skip_all, fields(endpoint = %self.inner.route.endpoint(), force = options.force))]
    pub async fn execute(
        &self,
        overrides: OperationOptions,
        options: ExecuteOptions,
    ) -> Result<Response> {
        let engine = self.inner.engine.clone();
        let mut ctx = self.context(&overrides)?;
        ctx.force_refetch = options.force;
        let key = ctx.query_key.clone();
        let tags = ctx.tags.clone();
        // Only read entries are addressable by optimistic targets.
        let self_tag = match self.inner.operation {
            OperationType::Read => ctx.self_tag.clone(),
            OperationType::Write => None,
        };

        let abort = AbortController::new();
        let signal = abort.signal();
        let operation = self.inner.operation;
        let pipeline_engine = engine.clone();
        let pipeline_key = key.clone();
        // Held until the request is registered and the entry marked as
        // fetching, so the pipeline's commits always land after both.
        let (registered_tx, registered_rx) = tokio::sync::oneshot::channel::<()>();
        let start = move || {
            let task = tokio::spawn(async move {
                let _ = registered_rx.await;
                let terminal = CoreFetch {
                    engine: pipeline_engine.clone(),
                    signal,
                };
                let result = pipeline_engine
                    .executor
                    .execute_middleware(operation, &mut ctx, &terminal)
                    .await;
                pipeline_engine.store.set_cache(
                    &pipeline_key,
                    CachePatch::new().fetching(false).loading(false),
                );
                result
            });
            async move {
                match task.await {
                    Ok(result) => result,
                    Err(e) => Err(HuginnError::Task(e.to_string())),
                }
            }
            .boxed()
        };

        let pending = if options.force {
            engine
                .store
                .store_pending(&key, start(), engine.promise_timeout)
        } else {
            let (pending, fresh) =
                engine
                    .store
                    .join_or_store_pending(&key, engine.promise_timeout, start);
            if !fresh {
                metrics::counter!(telemetry::DEDUP_HITS_TOTAL,
                    "operation" => self.inner.operation.as_str(),
                )
                .increment(1);
                debug!(key = %key, "joining in-flight request");
                return pending.wait().await;
            }
            pending
        };

        {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "execute");
            state.abort = Some(abort);
            state.phase = Phase::Fetching;
        }

        let has_data = engine
            .store
            .get_cache(&key)
            .is_some_and(|e| e.state.data.is_some());
        engine.store.set_cache(
            &key,
            CachePatch::new()
                .tags(tags)
                .self_tag(self_tag)
                .fetching(true)
                .loading(!has_data),
        );
        let _ = registered_tx.send(());
        let result = pending.wait().await;

        let phase = match &result {
            Ok(response) if response.aborted() => Phase::Idle,
            Ok(response) if response.is_success() => Phase::Success,
            _ => Phase::Error,
        };
        mutex_lock(&self.inner.state, SOURCE, "execute").phase = phase;
        result
    }

    /// Write-side entry point: always runs, never joins an in-flight
    /// request.
    pub async fn trigger(&self, overrides: OperationOptions) -> Result<Response> {
        self.execute(overrides, ExecuteOptions::forced()).await
    }

    /// Re-run with the current options, bypassing dedup.
    pub async fn refetch(&self) -> Result<Response> {
        self.execute(OperationOptions::default(), ExecuteOptions::forced())
            .await
    }

    /// Cancel the most recent request started by this controller. Its
    /// waiters resolve to an aborted response and nothing is committed.
    pub fn abort(&self) {
        if let Some(abort) = mutex_lock(&self.inner.state, SOURCE, "abort").abort.take() {
            abort.abort();
        }
    }
}

impl std::fmt::Debug for OperationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationController")
            .field("endpoint", &self.inner.route.endpoint())
            .field("operation", &self.inner.operation)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Spawn a forced re-run of the controller behind `weak` when `matches`
/// accepts it.
fn refetch_if(
    weak: &Weak<Inner>,
    reason: RefetchReason,
    matches: impl FnOnce(&OperationController) -> bool,
) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let controller = OperationController { inner };
    if !matches(&controller) {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(?reason, "refetch requested outside a tokio runtime; ignored");
        return;
    };
    debug!(?reason, endpoint = %controller.inner.route.endpoint(), "refetching");
    runtime.spawn(async move {
        if let Err(e) = controller.refetch().await {
            warn!(?reason, error = %e, "refetch failed");
        }
    });
}

/// Innermost layer of every plugin chain: serves short-circuit values or
/// calls the fetcher, then commits the outcome to the cache.
struct CoreFetch {
    engine: Arc<Engine>,
    signal: AbortSignal,
}

#[async_trait]
impl Terminal for CoreFetch {
    async fn call(&self, ctx: &mut PluginContext) -> Result<Response> {
        if let Some(response) = ctx.early_response.take() {
            return Ok(response);
        }
        if !ctx.force_refetch {
            if let Some(data) = ctx.cached_data.take() {
                return Ok(Response::success(200, data));
            }
        }

        let permit = match &self.engine.semaphore {
            Some(semaphore) => {
                let admitted = tokio::select! {
                    admitted = semaphore.acquire() => admitted,
                    _ = self.signal.aborted() => false,
                };
                if !admitted {
                    debug!(key = %ctx.query_key, "concurrency slot denied or aborted while queued");
                    return Ok(Response::cancelled());
                }
                Some(semaphore.clone())
            }
            None => None,
        };

        let request = FetchRequest {
            base_url: self.engine.base_url.clone(),
            route: ctx.route.clone(),
            path: ctx.path.clone(),
            defaults: self.engine.defaults.clone(),
            request: ctx.request.clone(),
            signal: self.signal.clone(),
        };
        let response = self.engine.fetcher.fetch(request).await;
        if let Some(semaphore) = permit {
            semaphore.release();
        }
        let response = response?;

        match &response.result {
            Ok(data) => ctx.update_entry(
                CachePatch::new()
                    .data(data.clone())
                    .clear_error()
                    .stale(false)
                    .now(),
            ),
            Err(RequestError::Aborted) => {
                debug!(key = %ctx.query_key, "request aborted; nothing committed");
            }
            Err(error) => ctx.update_entry(CachePatch::new().error(error.clone()).now()),
        }
        Ok(response)
    }
}
