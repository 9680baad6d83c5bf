//! Optimistic updates for writes.
//!
//! Before the request is sent, each [`OptimisticTarget`] rewrites the data
//! of every cache entry whose own path tag equals the target's tag, and the
//! entry's `previous_data` shows the last confirmed value. On success the
//! update (folded with the optional `on_success` updater) becomes part of
//! the confirmed value; on failure it is dropped. Either way the entry is
//! rebuilt from the confirmed value plus the updates still in flight, so
//! overlapping writes settle in any order without losing each other's data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::invalidation::{self, InvalidationHandle};
use crate::Result;
use crate::cache::CachePatch;
use crate::plugin::{Next, Plugin, PluginContext};
use crate::route::OperationType;
use crate::sync::mutex_lock;
use crate::types::{RequestError, Response};

pub const NAME: &str = "optimistic";

const SOURCE: &str = "plugins::optimistic";

/// Produces the speculative value from the current cached data.
pub type Updater = Arc<dyn Fn(Option<&Value>) -> Value + Send + Sync>;
/// Produces the committed value from the current data and the response.
pub type SuccessUpdater = Arc<dyn Fn(Option<&Value>, &Value) -> Value + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&RequestError) + Send + Sync>;

/// One optimistic rewrite of the entries tagged `tag`.
#[derive(Clone)]
pub struct OptimisticTarget {
    pub tag: String,
    pub update: Updater,
    pub on_success: Option<SuccessUpdater>,
    pub on_error: Option<ErrorHandler>,
    /// Restore the snapshot on failure. Default: true.
    pub rollback: bool,
    /// Invalidate `tag` after a successful write.
    pub invalidate: bool,
}

impl OptimisticTarget {
    pub fn new(
        tag: impl Into<String>,
        update: impl Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            tag: tag.into(),
            update: Arc::new(update),
            on_success: None,
            on_error: None,
            rollback: true,
            invalidate: false,
        }
    }

    pub fn on_success(
        mut self,
        f: impl Fn(Option<&Value>, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&RequestError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn rollback(mut self, enabled: bool) -> Self {
        self.rollback = enabled;
        self
    }

    pub fn invalidate(mut self, enabled: bool) -> Self {
        self.invalidate = enabled;
        self
    }
}

impl std::fmt::Debug for OptimisticTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticTarget")
            .field("tag", &self.tag)
            .field("rollback", &self.rollback)
            .field("invalidate", &self.invalidate)
            .finish_non_exhaustive()
    }
}

/// Per-call option listing the optimistic rewrites of a write.
#[derive(Debug, Clone, Default)]
pub struct Optimistic(pub Vec<OptimisticTarget>);

impl Optimistic {
    pub fn new(target: OptimisticTarget) -> Self {
        Self(vec![target])
    }

    pub fn and(mut self, target: OptimisticTarget) -> Self {
        self.0.push(target);
        self
    }
}

/// In-flight optimistic updates of one cache key.
struct Outstanding {
    /// Data before the first update, advanced by every confirmed write.
    confirmed: Option<Value>,
    /// Updates still awaiting their response, oldest first.
    updates: Vec<(u64, Updater)>,
}

impl Outstanding {
    /// Confirmed data with the remaining updates replayed over it.
    fn replay(&self) -> Option<Value> {
        self.updates
            .iter()
            .fold(self.confirmed.clone(), |data, (_, update)| {
                Some(update(data.as_ref()))
            })
    }
}

/// Applies [`Optimistic`] targets around writes.
///
/// Overlapping writes on the same entry are tracked per key: each one
/// settles independently, and the entry always shows the confirmed data
/// with the still-pending updates on top.
pub struct OptimisticPlugin {
    outstanding: Mutex<HashMap<String, Outstanding>>,
    next_id: AtomicU64,
}

impl OptimisticPlugin {
    pub fn new() -> Self {
        Self {
            outstanding: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of updates awaiting a response for `key`.
    pub fn outstanding(&self, key: &str) -> usize {
        mutex_lock(&self.outstanding, SOURCE, "outstanding")
            .get(key)
            .map_or(0, |o| o.updates.len())
    }

    fn apply(&self, ctx: &PluginContext, targets: &[OptimisticTarget]) -> Vec<Applied> {
        let mut outstanding = mutex_lock(&self.outstanding, SOURCE, "apply");
        targets
            .iter()
            .map(|target| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let mut keys = Vec::new();
                for (key, entry) in ctx.store.get_cache_entries_by_self_tag(&target.tag) {
                    // The write's own entry receives the server response instead.
                    if key == ctx.query_key {
                        continue;
                    }
                    let slot = outstanding
                        .entry(key.clone())
                        .or_insert_with(|| Outstanding {
                            confirmed: entry.state.data.clone(),
                            updates: Vec::new(),
                        });
                    slot.updates.push((id, target.update.clone()));
                    let speculative = (target.update)(entry.state.data.as_ref());
                    ctx.store.set_cache(
                        &key,
                        CachePatch::new()
                            .previous_data(slot.confirmed.clone())
                            .data(speculative)
                            .optimistic(true),
                    );
                    keys.push(key);
                }
                debug!(tag = %target.tag, entries = keys.len(), "optimistic update applied");
                Applied {
                    target: target.clone(),
                    id,
                    keys,
                }
            })
            .collect()
    }

    /// Drop update `id` from every key it touched. `confirm` advances the
    /// key's confirmed data when the update is kept.
    fn settle(
        &self,
        ctx: &PluginContext,
        applied: &Applied,
        confirm: impl Fn(Option<&Value>) -> Option<Value>,
    ) {
        let mut outstanding = mutex_lock(&self.outstanding, SOURCE, "settle");
        for key in &applied.keys {
            let Some(slot) = outstanding.get_mut(key) else {
                continue;
            };
            slot.updates.retain(|(id, _)| *id != applied.id);
            slot.confirmed = confirm(slot.confirmed.as_ref());

            let patch = CachePatch::new().data_opt(slot.replay());
            let patch = if slot.updates.is_empty() {
                outstanding.remove(key);
                patch.optimistic(false).previous_data(None)
            } else {
                patch.previous_data(slot.confirmed.clone())
            };
            ctx.store.set_cache(key, patch);
        }
    }

    fn commit(&self, ctx: &PluginContext, applied: &[Applied], response_data: &Value) {
        for entry in applied {
            let target = &entry.target;
            self.settle(ctx, entry, |confirmed| {
                let updated = (target.update)(confirmed);
                Some(match &target.on_success {
                    Some(on_success) => on_success(Some(&updated), response_data),
                    None => updated,
                })
            });
        }
    }

    fn rollback(&self, ctx: &PluginContext, applied: &[Applied], error: Option<&RequestError>) {
        for entry in applied {
            let target = &entry.target;
            if target.rollback {
                self.settle(ctx, entry, |confirmed| confirmed.cloned());
            } else {
                self.settle(ctx, entry, |confirmed| Some((target.update)(confirmed)));
            }
            if let (Some(on_error), Some(error)) = (&target.on_error, error) {
                on_error(error);
            }
        }
    }
}

impl Default for OptimisticPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OptimisticPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticPlugin")
            .field(
                "outstanding_keys",
                &mutex_lock(&self.outstanding, SOURCE, "debug").len(),
            )
            .finish()
    }
}

/// One target's update and the entry keys it touched.
struct Applied {
    target: OptimisticTarget,
    id: u64,
    keys: Vec<String>,
}

#[async_trait]
impl Plugin for OptimisticPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn operations(&self) -> &[OperationType] {
        &[OperationType::Write]
    }

    fn dependencies(&self) -> &[&'static str] {
        &[invalidation::NAME]
    }

    async fn middleware<'a>(
        &'a self,
        ctx: &'a mut PluginContext,
        next: Next<'a>,
    ) -> Result<Response> {
        let Some(Optimistic(targets)) = ctx.plugin_options.get::<Optimistic>().cloned() else {
            return next.run(ctx).await;
        };
        let applied = self.apply(ctx, &targets);

        let response = match next.run(&mut *ctx).await {
            Ok(response) => response,
            Err(e) => {
                self.rollback(ctx, &applied, None);
                return Err(e);
            }
        };

        match &response.result {
            Ok(data) => {
                self.commit(ctx, &applied, data);
                let tags: Vec<String> = applied
                    .iter()
                    .filter(|a| a.target.invalidate)
                    .map(|a| a.target.tag.clone())
                    .collect();
                if !tags.is_empty() {
                    if let Some(handle) = ctx.export::<InvalidationHandle>(invalidation::NAME) {
                        handle.invalidate(&tags);
                    }
                }
            }
            Err(error) => self.rollback(ctx, &applied, Some(error)),
        }
        Ok(response)
    }
}
