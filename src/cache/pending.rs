//! In-flight request deduplication.
//!
//! [`PromiseCache`] maps a query key to the shared future of the request
//! currently running for it, so concurrent callers await one network
//! round-trip. An entry disappears on whichever comes first:
//!
//! - settlement of the future (removal is keyed on the entry's id, so a
//!   newer request stored under the same key is left alone), or
//! - its timeout, via moka's per-entry expiry.
//!
//! The timeout only bounds how long a never-settling request occupies the
//! map. It does not cancel the request itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use moka::Expiry;
use moka::ops::compute::Op;
use moka::sync::Cache;
use tracing::debug;

use crate::Result;
use crate::types::Response;

/// Default lifetime of an unsettled entry.
pub const DEFAULT_PROMISE_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Shared handle to the outcome of an in-flight request.
pub type SharedResponse = Shared<BoxFuture<'static, Result<Response>>>;

/// An in-flight request registered under a query key.
#[derive(Clone)]
pub struct PendingRequest {
    id: u64,
    future: SharedResponse,
    timeout: Duration,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// A future resolving to the request's outcome. Every clone observes
    /// the same result.
    pub fn wait(&self) -> SharedResponse {
        self.future.clone()
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

struct PendingExpiry;

impl Expiry<String, PendingRequest> for PendingExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &PendingRequest,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.timeout)
    }
}

/// Cheap-clone handle to the in-flight request table.
#[derive(Clone)]
pub struct PromiseCache {
    entries: Cache<String, PendingRequest>,
    next_id: Arc<AtomicU64>,
}

impl PromiseCache {
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().expire_after(PendingExpiry).build(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register `future` as the pending request for `key`.
    ///
    /// Replaces any previous entry for the key. Must be called inside a
    /// tokio runtime: a task awaits settlement (bounded by `timeout`) to
    /// clean the entry up.
    pub fn store(
        &self,
        key: &str,
        future: BoxFuture<'static, Result<Response>>,
        timeout: Duration,
    ) -> PendingRequest {
        let pending = self.pending(future, timeout);
        self.entries.insert(key.to_owned(), pending.clone());
        self.watch(key, &pending);
        pending
    }

    /// The pending request for `key`, or the one produced by `start` when
    /// none is registered.
    ///
    /// Lookup and registration are one atomic step: among concurrent
    /// callers for the same key exactly one runs `start`. The flag is
    /// `true` for that caller.
    pub fn join_or_store(
        &self,
        key: &str,
        timeout: Duration,
        start: impl FnOnce() -> BoxFuture<'static, Result<Response>>,
    ) -> (PendingRequest, bool) {
        let entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| self.pending(start(), timeout));
        let fresh = entry.is_fresh();
        let pending = entry.into_value();
        if fresh {
            self.watch(key, &pending);
        }
        (pending, fresh)
    }

    fn pending(
        &self,
        future: BoxFuture<'static, Result<Response>>,
        timeout: Duration,
    ) -> PendingRequest {
        PendingRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            future: future.shared(),
            timeout,
        }
    }

    /// Remove the entry for `key` once `pending` settles.
    fn watch(&self, key: &str, pending: &PendingRequest) {
        let cache = self.clone();
        let key = key.to_owned();
        let id = pending.id;
        let timeout = pending.timeout;
        let settled = pending.wait();
        tokio::spawn(async move {
            if tokio::time::timeout(timeout, settled).await.is_ok() {
                cache.remove_if(&key, id);
            } else {
                debug!(key = %key, "pending request outlived its timeout");
            }
        });
    }

    /// The pending request for `key`, if one is registered and unexpired.
    pub fn get(&self, key: &str) -> Option<PendingRequest> {
        self.entries.get(key)
    }

    /// Drop the entry for `key`. No-op when absent.
    pub fn remove(&self, key: &str) {
        self.entries.invalidate(key);
    }

    /// Drop the entry for `key` only if it is still request `id`.
    pub(crate) fn remove_if(&self, key: &str, id: u64) {
        let _ = self
            .entries
            .entry(key.to_owned())
            .and_compute_with(|current| match current {
                Some(entry) if entry.value().id == id => Op::Remove,
                _ => Op::Nop,
            });
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

impl Default for PromiseCache {
    fn default() -> Self {
        Self::new()
    }
}
