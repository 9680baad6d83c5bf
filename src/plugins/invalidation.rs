//! Tag invalidation after successful writes.
//!
//! Once a write succeeds, the tags to invalidate are resolved from the
//! call's [`Invalidate`] option (or the plugin's default mode), matching
//! cache entries are flagged stale, and one `invalidate` event carries the
//! deduplicated tag list to mounted read controllers.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::Result;
use crate::cache::CacheStore;
use crate::events::{Event, EventEmitter};
use crate::plugin::{Next, Plugin, PluginContext};
use crate::route::OperationType;
use crate::telemetry;
use crate::types::Response;

pub const NAME: &str = "invalidation";

/// Which of the write's own tags to invalidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// Every tag of the write (`users`, `users/1`).
    #[default]
    All,
    /// Only the write's own path tag (`users/1`).
    #[serde(rename = "self")]
    SelfOnly,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidateTarget {
    Mode(InvalidationMode),
    Tag(String),
}

/// Per-call option selecting what a write invalidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidate(pub Vec<InvalidateTarget>);

impl Invalidate {
    pub fn mode(mode: InvalidationMode) -> Self {
        Self(vec![InvalidateTarget::Mode(mode)])
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            tags.into_iter()
                .map(|t| InvalidateTarget::Tag(t.into()))
                .collect(),
        )
    }

    /// Also apply `mode` on top of the listed tags.
    pub fn with_mode(mut self, mode: InvalidationMode) -> Self {
        self.0.push(InvalidateTarget::Mode(mode));
        self
    }

    /// Concrete, deduplicated tags for the write described by `ctx`.
    pub fn resolve(&self, ctx: &PluginContext) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        let mut push = |tag: &String| {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        };
        for target in &self.0 {
            match target {
                InvalidateTarget::Mode(InvalidationMode::All) => ctx.tags.iter().for_each(&mut push),
                InvalidateTarget::Mode(InvalidationMode::SelfOnly) => {
                    ctx.self_tag.iter().for_each(&mut push)
                }
                InvalidateTarget::Mode(InvalidationMode::None) => {}
                InvalidateTarget::Tag(tag) => push(tag),
            }
        }
        tags
    }
}

/// Handle other plugins use to invalidate tags, exported under
/// [`NAME`].
#[derive(Clone)]
pub struct InvalidationHandle {
    store: CacheStore,
    events: EventEmitter,
}

impl InvalidationHandle {
    pub fn new(store: CacheStore, events: EventEmitter) -> Self {
        Self { store, events }
    }

    /// Flag entries sharing a tag with `tags` as stale and emit one
    /// `invalidate` event. No-op for an empty list. Returns the stale keys.
    pub fn invalidate(&self, tags: &[String]) -> Vec<String> {
        let mut unique: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !unique.contains(tag) {
                unique.push(tag.clone());
            }
        }
        if unique.is_empty() {
            return Vec::new();
        }

        let keys = self.store.mark_stale(&unique);
        debug!(tags = ?unique, stale = keys.len(), "invalidating");
        metrics::counter!(telemetry::INVALIDATIONS_TOTAL).increment(1);
        self.events.emit(&Event::Invalidate(unique));
        keys
    }
}

impl std::fmt::Debug for InvalidationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationHandle").finish_non_exhaustive()
    }
}

/// Invalidates tags after successful writes.
#[derive(Debug, Clone, Default)]
pub struct InvalidationPlugin {
    default_mode: InvalidationMode,
}

impl InvalidationPlugin {
    pub fn new(default_mode: InvalidationMode) -> Self {
        Self { default_mode }
    }

    pub fn default_mode(&self) -> InvalidationMode {
        self.default_mode
    }
}

#[async_trait]
impl Plugin for InvalidationPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn operations(&self) -> &[OperationType] {
        &[OperationType::Write]
    }

    async fn middleware<'a>(
        &'a self,
        ctx: &'a mut PluginContext,
        next: Next<'a>,
    ) -> Result<Response> {
        let response = next.run(&mut *ctx).await?;
        if !response.is_success() {
            return Ok(response);
        }

        let tags = match ctx.plugin_options.get::<Invalidate>() {
            Some(option) => option.resolve(ctx),
            None => Invalidate::mode(self.default_mode).resolve(ctx),
        };
        InvalidationHandle::new(ctx.store.clone(), ctx.events.clone()).invalidate(&tags);
        Ok(response)
    }

    fn exports(&self, ctx: &PluginContext) -> Option<Arc<dyn Any + Send + Sync>> {
        Some(Arc::new(InvalidationHandle::new(
            ctx.store.clone(),
            ctx.events.clone(),
        )))
    }
}
