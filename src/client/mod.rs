//! Client: the entry point owning the cache, event bus and plugins.

mod builder;

pub use builder::{Huginn, HuginnBuilder};

use std::sync::Arc;

use crate::cache::CacheStore;
use crate::controller::{Engine, OperationController, OperationOptions};
use crate::events::EventEmitter;
use crate::plugin::PluginExecutor;
use crate::plugins::InvalidationHandle;
use crate::route::{OperationType, Route};
use crate::sync::Semaphore;

/// Cheap-clone handle to a configured engine.
///
/// Every controller created from one client shares its cache store, event
/// bus, plugin instances and concurrency limit.
#[derive(Clone)]
pub struct Client {
    pub(crate) engine: Arc<Engine>,
}

impl Client {
    /// Controller for a read operation.
    pub fn query(&self, route: Route, options: impl Into<OperationOptions>) -> OperationController {
        self.controller(route, OperationType::Read, options)
    }

    /// Controller for a write operation.
    pub fn mutation(
        &self,
        route: Route,
        options: impl Into<OperationOptions>,
    ) -> OperationController {
        self.controller(route, OperationType::Write, options)
    }

    pub fn controller(
        &self,
        route: Route,
        operation: OperationType,
        options: impl Into<OperationOptions>,
    ) -> OperationController {
        OperationController::new(self.engine.clone(), route, operation, options.into())
    }

    pub fn store(&self) -> &CacheStore {
        &self.engine.store
    }

    pub fn events(&self) -> &EventEmitter {
        &self.engine.events
    }

    pub fn plugins(&self) -> &PluginExecutor {
        &self.engine.executor
    }

    pub fn base_url(&self) -> &str {
        &self.engine.base_url
    }

    /// The concurrency limiter, when `max_concurrency` is configured.
    pub fn semaphore(&self) -> Option<&Semaphore> {
        self.engine.semaphore.as_deref()
    }

    /// Mark entries tagged with any of `tags` stale and notify mounted
    /// read controllers.
    pub fn invalidate(&self, tags: &[String]) -> Vec<String> {
        InvalidationHandle::new(self.engine.store.clone(), self.engine.events.clone())
            .invalidate(tags)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.engine.base_url)
            .field("plugins", &self.engine.executor)
            .finish_non_exhaustive()
    }
}
