//! Plugin pipeline.
//!
//! A [`Plugin`] participates in read and/or write operations through:
//!
//! - **middleware**, composed into an onion around the core fetch. Each
//!   layer receives a [`Next`] and may call it, inspect or replace what it
//!   returns, or return a response of its own without calling it;
//! - **`after_response`**, run in plugin order once the chain resolved;
//! - **lifecycle hooks** fired by controllers on mount, option update and
//!   unmount;
//! - **exports**, a typed handle other plugins pull by name through
//!   [`PluginContext::export`].
//!
//! Ordering and validation live in [`PluginExecutor`].
//!
//! ```text
//!   execute()
//!      │
//!      ▼
//!   plugin A ──► plugin B ──► ... ──► Terminal (core fetch)
//!      ▲            ▲                       │
//!      └────────────┴─────── Response ◄─────┘
//!      │
//!      ▼
//!   after_response (A, B, ...)
//! ```

mod context;
mod executor;
mod options;

pub use context::PluginContext;
pub use executor::PluginExecutor;
pub use options::PluginOptions;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::Result;
use crate::route::OperationType;
use crate::types::Response;

/// Lifecycle events dispatched by [`PluginExecutor::execute_lifecycle`].
/// Option updates go through [`PluginExecutor::execute_update_lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Mount,
    Unmount,
}

/// Extension point of the request pipeline.
///
/// Every handler may fail; an error aborts the whole operation and reaches
/// the caller of `execute()`/`trigger()` unchanged.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name, used for dependencies and exports.
    fn name(&self) -> &str;

    /// Operations this plugin takes part in.
    fn operations(&self) -> &[OperationType];

    /// Names of plugins that must be ordered before this one.
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    /// Lower values run first (outermost middleware). Ties keep
    /// registration order.
    fn priority(&self) -> i32 {
        0
    }

    async fn middleware<'a>(
        &'a self,
        ctx: &'a mut PluginContext,
        next: Next<'a>,
    ) -> Result<Response> {
        next.run(ctx).await
    }

    /// Observe or replace the final response.
    fn after_response(&self, _ctx: &PluginContext, response: Response) -> Result<Response> {
        Ok(response)
    }

    fn on_mount(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Options of a mounted controller changed. `prev` is the context
    /// before the change.
    fn on_update(&self, _ctx: &PluginContext, _prev: &PluginContext) -> Result<()> {
        Ok(())
    }

    fn on_unmount(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Handle exposed to other plugins.
    fn exports(&self, _ctx: &PluginContext) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }
}

/// Innermost layer of the middleware chain.
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn call(&self, ctx: &mut PluginContext) -> Result<Response>;
}

/// The rest of the middleware chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Plugin>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Plugin>], terminal: &'a dyn Terminal) -> Self {
        Self { chain, terminal }
    }

    /// Run the remaining middleware, then the terminal.
    pub fn run<'b>(self, ctx: &'b mut PluginContext) -> BoxFuture<'b, Result<Response>>
    where
        'a: 'b,
    {
        match self.chain.split_first() {
            Some((plugin, rest)) => plugin.middleware(ctx, Next::new(rest, self.terminal)),
            None => self.terminal.call(ctx),
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field(
                "chain",
                &self.chain.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
