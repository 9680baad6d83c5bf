//! Builder for configuring client instances

use std::sync::Arc;
use std::time::Duration;

use super::Client;
use crate::cache::{CacheStore, DEFAULT_PROMISE_TIMEOUT};
use crate::config::EngineConfig;
use crate::controller::Engine;
use crate::events::EventEmitter;
use crate::fetch::{Fetcher, HttpFetcher, RetryConfig};
use crate::plugin::{Plugin, PluginExecutor};
use crate::plugins::{
    DebouncePlugin, InvalidationMode, InvalidationPlugin, OptimisticPlugin, PollingPlugin,
    ThrottlePlugin,
};
use crate::sync::Semaphore;
use crate::types::{Headers, RequestOptions};
use crate::{HuginnError, Result};

/// Main entry point for creating clients.
pub struct Huginn;

impl Huginn {
    /// Create a new builder for configuring a client.
    pub fn builder() -> HuginnBuilder {
        HuginnBuilder::new()
    }
}

/// Builder for configuring client instances.
pub struct HuginnBuilder {
    base_url: Option<String>,
    default_headers: Vec<Headers>,
    retry: Option<RetryConfig>,
    promise_timeout: Duration,
    max_concurrency: Option<usize>,
    plugins: Vec<Arc<dyn Plugin>>,
    builtin_plugins: Option<InvalidationMode>,
    fetcher: Option<Arc<dyn Fetcher>>,
    store: Option<CacheStore>,
}

impl HuginnBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: Vec::new(),
            retry: None,
            promise_timeout: DEFAULT_PROMISE_TIMEOUT,
            max_concurrency: None,
            plugins: Vec::new(),
            builtin_plugins: None,
            fetcher: None,
            store: None,
        }
    }

    /// Apply every setting from a loaded configuration.
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.base_url = Some(config.base_url.clone());
        if !config.default_headers.is_empty() {
            self.default_headers
                .push(Headers::Map(config.default_headers.clone()));
        }
        self.retry = Some(config.retry_config());
        self.promise_timeout = config.promise_timeout();
        self.max_concurrency = config.max_concurrency;
        self.builtin_plugins = Some(config.invalidation);
        self
    }

    /// Prefix of every request URL (required).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Add a default header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers
            .push(Headers::Pairs(vec![(name.into(), value.into())]));
        self
    }

    /// Add a default header source (e.g. [`Headers::Dynamic`] for tokens).
    pub fn headers(mut self, source: Headers) -> Self {
        self.default_headers.push(source);
        self
    }

    /// Retry policy for requests that do not set their own.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Lifetime of unsettled entries in the dedup table.
    pub fn promise_timeout(mut self, timeout: Duration) -> Self {
        self.promise_timeout = timeout;
        self
    }

    /// Cap concurrent network calls. Excess calls queue in FIFO order.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    /// Register a plugin.
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Register a shared plugin instance.
    pub fn plugin_arc(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Register the built-in plugins (invalidation with `mode`, optimistic,
    /// debounce, throttle, polling). Debounce and throttle only act on
    /// calls that carry their option.
    pub fn builtin_plugins(mut self, mode: InvalidationMode) -> Self {
        self.builtin_plugins = Some(mode);
        self
    }

    /// Replace the HTTP fetcher (tests, custom transports).
    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Share an existing cache store with this client.
    pub fn store(mut self, store: CacheStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| HuginnError::Configuration("base_url is required".to_string()))?;
        reqwest::Url::parse(&base_url).map_err(|e| {
            HuginnError::Configuration(format!("invalid base URL '{base_url}': {e}"))
        })?;
        if self.max_concurrency == Some(0) {
            return Err(HuginnError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        let retry = self.retry.unwrap_or_default();
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new()?.retry(retry.clone())),
        };

        let mut plugins = self.plugins;
        if let Some(mode) = self.builtin_plugins {
            let builtins: [Arc<dyn Plugin>; 5] = [
                Arc::new(InvalidationPlugin::new(mode)),
                Arc::new(OptimisticPlugin::new()),
                Arc::new(DebouncePlugin::new()),
                Arc::new(ThrottlePlugin::new()),
                Arc::new(PollingPlugin::new()),
            ];
            plugins.extend(builtins);
        }
        let executor = PluginExecutor::new(plugins)?;

        let defaults = RequestOptions {
            headers: self.default_headers,
            retry: Some(retry),
            ..RequestOptions::default()
        };

        Ok(Client {
            engine: Arc::new(Engine {
                base_url,
                defaults,
                store: self.store.unwrap_or_default(),
                events: EventEmitter::new(),
                executor,
                fetcher,
                semaphore: self.max_concurrency.map(|max| Arc::new(Semaphore::new(max))),
                promise_timeout: self.promise_timeout,
            }),
        })
    }
}

impl Default for HuginnBuilder {
    fn default() -> Self {
        Self::new()
    }
}
