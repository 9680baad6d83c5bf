//! Per-invocation plugin context.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;

use super::{Plugin, PluginOptions};
use crate::Result;
use crate::cache::{CacheEntry, CachePatch, CacheStore};
use crate::events::EventEmitter;
use crate::key::create_query_key;
use crate::route::{OperationType, Route, generate_tags, self_tag};
use crate::types::{RequestOptions, Response};

/// State shared by every plugin taking part in one operation.
///
/// The short-circuit fields (`cached_data`, `early_response`,
/// `force_refetch`) are written by middleware and read by the core fetch.
#[derive(Clone)]
pub struct PluginContext {
    pub operation: OperationType,
    pub route: Route,
    /// Route path with parameters substituted.
    pub path: Vec<String>,
    pub query_key: String,
    /// Explicit tags when supplied, otherwise derived from `path`.
    pub tags: Vec<String>,
    pub self_tag: Option<String>,
    pub request: RequestOptions,
    pub plugin_options: PluginOptions,
    /// Data the core fetch returns instead of calling the network.
    pub cached_data: Option<Value>,
    /// Response the core fetch returns as-is.
    pub early_response: Option<Response>,
    /// Bypass `cached_data` and dedup.
    pub force_refetch: bool,
    pub store: CacheStore,
    pub events: EventEmitter,
    pub(crate) plugins: Arc<[Arc<dyn Plugin>]>,
}

impl PluginContext {
    /// Resolve path, key and tags for `route` called with `request`.
    pub fn new(
        operation: OperationType,
        route: Route,
        request: RequestOptions,
        store: CacheStore,
        events: EventEmitter,
    ) -> Result<Self> {
        let path = route.resolve(&request.params)?;
        let query_key = create_query_key(&path, route.method, &request.key_value());
        let tags = request
            .tags
            .clone()
            .unwrap_or_else(|| generate_tags(&path));
        let self_tag = self_tag(&path);
        Ok(Self {
            operation,
            route,
            path,
            query_key,
            tags,
            self_tag,
            request,
            plugin_options: PluginOptions::new(),
            cached_data: None,
            early_response: None,
            force_refetch: false,
            store,
            events,
            plugins: Arc::from(Vec::new()),
        })
    }

    pub fn with_plugin_options(mut self, options: PluginOptions) -> Self {
        self.plugin_options = options;
        self
    }

    /// Snapshot of this operation's cache entry.
    pub fn entry(&self) -> Option<CacheEntry> {
        self.store.get_cache(&self.query_key)
    }

    /// Data currently cached for this operation's key.
    pub fn cached(&self) -> Option<Value> {
        self.entry().and_then(|e| e.state.data)
    }

    pub fn update_entry(&self, patch: CachePatch) {
        self.store.set_cache(&self.query_key, patch);
    }

    /// Fetch the typed export of the plugin registered as `name`.
    ///
    /// `None` when no such plugin is registered, it exports nothing, or its
    /// export is not a `T`.
    pub fn export<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.plugins
            .iter()
            .find(|p| p.name() == name)
            .and_then(|p| p.exports(self))
            .and_then(|export| export.downcast::<T>().ok())
    }

    /// Endpoint identity (`"GET users/:id"`), shared by every call to the
    /// same route.
    pub fn endpoint(&self) -> String {
        self.route.endpoint()
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("operation", &self.operation)
            .field("endpoint", &self.route.endpoint())
            .field("query_key", &self.query_key)
            .field("tags", &self.tags)
            .field("force_refetch", &self.force_refetch)
            .field("short_circuit", &self.early_response.is_some())
            .finish_non_exhaustive()
    }
}
