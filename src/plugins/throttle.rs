//! Throttled reads: at most one network call per window per endpoint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::Result;
use crate::plugin::{Next, Plugin, PluginContext};
use crate::route::OperationType;
use crate::sync::mutex_lock;
use crate::telemetry;
use crate::types::Response;

pub const NAME: &str = "throttle";
const SOURCE: &str = "plugins::throttle";

/// Per-call throttle window, overriding the plugin default.
/// `Duration::ZERO` disables throttling for the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle(pub Duration);

/// Rate-limits reads per endpoint. Calls inside the window are served
/// from the cache and do not extend it.
#[derive(Debug, Default)]
pub struct ThrottlePlugin {
    default_window: Option<Duration>,
    last_call: Mutex<HashMap<String, Instant>>,
}

impl ThrottlePlugin {
    /// Only calls carrying a [`Throttle`] option are throttled.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(window: Duration) -> Self {
        Self {
            default_window: Some(window),
            last_call: Mutex::default(),
        }
    }
}

#[async_trait]
impl Plugin for ThrottlePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn operations(&self) -> &[OperationType] {
        &[OperationType::Read]
    }

    async fn middleware<'a>(
        &'a self,
        ctx: &'a mut PluginContext,
        next: Next<'a>,
    ) -> Result<Response> {
        let window = ctx
            .plugin_options
            .get::<Throttle>()
            .map(|t| t.0)
            .or(self.default_window)
            .filter(|w| !w.is_zero());
        let Some(window) = window else {
            return next.run(ctx).await;
        };

        let endpoint = ctx.endpoint();
        let allowed = {
            let mut last_call = mutex_lock(&self.last_call, SOURCE, "middleware");
            let now = Instant::now();
            match last_call.get(&endpoint) {
                Some(last) if now.duration_since(*last) < window => false,
                _ => {
                    last_call.insert(endpoint.clone(), now);
                    true
                }
            }
        };

        if allowed {
            return next.run(ctx).await;
        }
        metrics::counter!(telemetry::SHORT_CIRCUITS_TOTAL, "plugin" => NAME).increment(1);
        debug!(endpoint = %endpoint, "throttled; serving cached data");
        Ok(Response::from_cached(ctx.cached()))
    }
}
