//! Polling: refetch a query on an interval.
//!
//! After every response the plugin (re)arms one timer per query key. When
//! it fires, a `refetch` event asks the mounted controller to run again,
//! whose response arms the next timer. Changing the controller's key
//! moves the timer to the new key; unmounting cancels it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::Result;
use crate::events::{Event, EventEmitter, RefetchReason};
use crate::plugin::{Plugin, PluginContext};
use crate::route::OperationType;
use crate::sync::mutex_lock;
use crate::types::{RequestError, Response};

pub const NAME: &str = "polling";
const SOURCE: &str = "plugins::polling";

/// Computes the next delay from the latest data and error. `None` stops
/// polling.
pub type IntervalFn =
    Arc<dyn Fn(Option<&Value>, Option<&RequestError>) -> Option<Duration> + Send + Sync>;

/// Per-call polling option.
#[derive(Clone)]
pub enum Polling {
    Every(Duration),
    Dynamic(IntervalFn),
}

impl Polling {
    pub fn dynamic(
        f: impl Fn(Option<&Value>, Option<&RequestError>) -> Option<Duration> + Send + Sync + 'static,
    ) -> Self {
        Polling::Dynamic(Arc::new(f))
    }

    fn next_delay(&self, data: Option<&Value>, error: Option<&RequestError>) -> Option<Duration> {
        let delay = match self {
            Polling::Every(interval) => Some(*interval),
            Polling::Dynamic(f) => f(data, error),
        };
        delay.filter(|d| !d.is_zero())
    }
}

impl std::fmt::Debug for Polling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polling::Every(d) => f.debug_tuple("Every").field(d).finish(),
            Polling::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Schedules refetches for queries carrying a [`Polling`] option.
#[derive(Default)]
pub struct PollingPlugin {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PollingPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn schedule(&self, key: &str, delay: Duration, events: EventEmitter) {
        let query_key = key.to_owned();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.emit(&Event::Refetch {
                query_key,
                reason: RefetchReason::Polling,
            });
        });
        debug!(key, delay_ms = delay.as_millis() as u64, "poll scheduled");
        if let Some(old) = mutex_lock(&self.timers, SOURCE, "schedule").insert(key.to_owned(), timer)
        {
            old.abort();
        }
    }

    fn cancel(&self, key: &str) {
        if let Some(timer) = mutex_lock(&self.timers, SOURCE, "cancel").remove(key) {
            timer.abort();
        }
    }

    /// Keys with an armed timer.
    pub fn scheduled(&self) -> Vec<String> {
        mutex_lock(&self.timers, SOURCE, "scheduled")
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for PollingPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingPlugin")
            .field("scheduled", &self.scheduled())
            .finish()
    }
}

#[async_trait]
impl Plugin for PollingPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn operations(&self) -> &[OperationType] {
        &[OperationType::Read]
    }

    fn after_response(&self, ctx: &PluginContext, response: Response) -> Result<Response> {
        let Some(polling) = ctx.plugin_options.get::<Polling>() else {
            return Ok(response);
        };
        if response.aborted() {
            return Ok(response);
        }
        match polling.next_delay(response.data(), response.error()) {
            Some(delay) => self.schedule(&ctx.query_key, delay, ctx.events.clone()),
            None => self.cancel(&ctx.query_key),
        }
        Ok(response)
    }

    fn on_update(&self, ctx: &PluginContext, prev: &PluginContext) -> Result<()> {
        if prev.query_key == ctx.query_key {
            return Ok(());
        }
        self.cancel(&prev.query_key);
        if let Some(polling) = ctx.plugin_options.get::<Polling>() {
            let entry = ctx.entry();
            let state = entry.as_ref().map(|e| &e.state);
            let delay = polling.next_delay(
                state.and_then(|s| s.data.as_ref()),
                state.and_then(|s| s.error.as_ref()),
            );
            if let Some(delay) = delay {
                self.schedule(&ctx.query_key, delay, ctx.events.clone());
            }
        }
        Ok(())
    }

    fn on_unmount(&self, ctx: &PluginContext) -> Result<()> {
        self.cancel(&ctx.query_key);
        Ok(())
    }
}
