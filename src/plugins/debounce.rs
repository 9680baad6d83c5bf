//! Debounced reads.
//!
//! Requests to one endpoint are held back until the endpoint has been
//! quiet for the debounce window. While a timer is pending, calls are
//! answered from the cache (or with an empty response). When it fires, a
//! `refetch` event asks the mounted controller to run the pending key,
//! and that run goes through to the network.
//!
//! Per endpoint:
//!
//! | incoming call              | action                            |
//! |----------------------------|-----------------------------------|
//! | no slot                    | arm timer, serve cached           |
//! | same key, timer pending    | serve cached, timer untouched     |
//! | same key, timer fired      | clear slot, proceed to network    |
//! | different key              | re-arm timer for new key, serve   |

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::Result;
use crate::events::{Event, EventEmitter, RefetchReason};
use crate::plugin::{Next, Plugin, PluginContext};
use crate::route::OperationType;
use crate::sync::mutex_lock;
use crate::telemetry;
use crate::types::Response;

pub const NAME: &str = "debounce";
const SOURCE: &str = "plugins::debounce";

/// Per-call debounce window, overriding the plugin default.
/// `Duration::ZERO` disables debouncing for the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounce(pub Duration);

struct Slot {
    key: String,
    fired: bool,
    timer: JoinHandle<()>,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// Debounces reads per endpoint.
#[derive(Default)]
pub struct DebouncePlugin {
    default_wait: Option<Duration>,
    slots: Slots,
}

impl DebouncePlugin {
    /// Only calls carrying a [`Debounce`] option are debounced.
    pub fn new() -> Self {
        Self::default()
    }

    /// Debounce every read by `wait` unless the call overrides it.
    pub fn with_default(wait: Duration) -> Self {
        Self {
            default_wait: Some(wait),
            slots: Slots::default(),
        }
    }

    fn wait_for(&self, ctx: &PluginContext) -> Option<Duration> {
        ctx.plugin_options
            .get::<Debounce>()
            .map(|d| d.0)
            .or(self.default_wait)
            .filter(|wait| !wait.is_zero())
    }

    fn arm(&self, endpoint: String, key: String, wait: Duration, events: EventEmitter) -> Slot {
        let slots = self.slots.clone();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            {
                let mut slots = mutex_lock(&slots, SOURCE, "fire");
                match slots.get_mut(&endpoint) {
                    Some(slot) if slot.key == timer_key => slot.fired = true,
                    _ => return,
                }
            }
            debug!(endpoint = %endpoint, "debounce window elapsed");
            events.emit(&Event::Refetch {
                query_key: timer_key,
                reason: RefetchReason::Debounce,
            });
        });
        Slot {
            key,
            fired: false,
            timer,
        }
    }

    /// Endpoints with a pending or fired timer.
    pub fn pending_endpoints(&self) -> Vec<String> {
        mutex_lock(&self.slots, SOURCE, "pending_endpoints")
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for DebouncePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncePlugin")
            .field("default_wait", &self.default_wait)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Plugin for DebouncePlugin {
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
        let Some(wait) = self.wait_for(ctx) else {
            return next.run(ctx).await;
        };
        let endpoint = ctx.endpoint();

        let proceed = {
            let mut slots = mutex_lock(&self.slots, SOURCE, "middleware");
            match slots.get(&endpoint) {
                Some(slot) if slot.key == ctx.query_key && slot.fired => {
                    slots.remove(&endpoint);
                    true
                }
                Some(slot) if slot.key == ctx.query_key => false,
                _ => {
                    let slot = self.arm(
                        endpoint.clone(),
                        ctx.query_key.clone(),
                        wait,
                        ctx.events.clone(),
                    );
                    if let Some(old) = slots.insert(endpoint.clone(), slot) {
                        old.timer.abort();
                    }
                    false
                }
            }
        };

        if proceed {
            return next.run(ctx).await;
        }
        metrics::counter!(telemetry::SHORT_CIRCUITS_TOTAL, "plugin" => NAME).increment(1);
        debug!(endpoint = %endpoint, "debounced; serving cached data");
        Ok(Response::from_cached(ctx.cached()))
    }

    fn on_unmount(&self, ctx: &PluginContext) -> Result<()> {
        let mut slots = mutex_lock(&self.slots, SOURCE, "on_unmount");
        let endpoint = ctx.endpoint();
        if slots
            .get(&endpoint)
            .is_some_and(|slot| slot.key == ctx.query_key)
        {
            if let Some(slot) = slots.remove(&endpoint) {
                slot.timer.abort();
            }
        }
        Ok(())
    }
}
