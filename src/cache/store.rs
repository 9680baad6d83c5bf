//! Subscribable key → entry store.
//!
//! The store never evicts: entries live until [`CacheStore::delete_cache`]
//! or [`CacheStore::clear`]. Writes are "last write wins" per key and every
//! [`CacheStore::set_cache`] synchronously notifies that key's subscribers
//! with a snapshot of the updated entry. No batching: callers that want to
//! coalesce notifications must do so themselves.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::trace;

use super::pending::{PendingRequest, PromiseCache};
use crate::Result;
use crate::sync::{Subscription, mutex_lock};
use crate::types::{RequestError, Response};

const SOURCE: &str = "cache::store";

/// Lifecycle flags and result of the most recent operation on a key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationState {
    /// Fetching with no data to show yet.
    pub loading: bool,
    /// A request for this key is in flight.
    pub fetching: bool,
    pub data: Option<Value>,
    pub error: Option<RequestError>,
    /// `data` holds a speculative value written before server confirmation.
    pub is_optimistic: bool,
    /// Flagged for refetch by invalidation; data is kept.
    pub is_stale: bool,
    /// Milliseconds since the Unix epoch of the last committed result.
    pub timestamp: u64,
}

/// Snapshot of a cache entry.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub state: OperationState,
    /// Ordered, duplicate-free. Replaced wholesale on each classification.
    pub tags: Vec<String>,
    /// Tag of the entry's own resolved path (`"users/123"`).
    pub self_tag: Option<String>,
    pub meta: Map<String, Value>,
    /// Data before the first outstanding optimistic update.
    pub previous_data: Option<Value>,
    pub pending_promise: Option<PendingRequest>,
    pub subscriber_count: usize,
}

impl CacheEntry {
    /// Whether any of the entry's tags appears in `tags`.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

/// Partial update applied by [`CacheStore::set_cache`].
///
/// State fields merge shallowly; `tags` replace the previous set; `meta`
/// merges key-wise. Supplying `data` or `error` clears the key's pending
/// request.
#[derive(Debug, Clone, Default)]
pub struct CachePatch {
    loading: Option<bool>,
    fetching: Option<bool>,
    data: Option<Option<Value>>,
    error: Option<Option<RequestError>>,
    is_optimistic: Option<bool>,
    is_stale: Option<bool>,
    timestamp: Option<u64>,
    tags: Option<Vec<String>>,
    self_tag: Option<Option<String>>,
    meta: Vec<(String, Value)>,
    previous_data: Option<Option<Value>>,
}

impl CachePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loading(mut self, loading: bool) -> Self {
        self.loading = Some(loading);
        self
    }

    pub fn fetching(mut self, fetching: bool) -> Self {
        self.fetching = Some(fetching);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(Some(data));
        self
    }

    /// Set or clear data.
    pub fn data_opt(mut self, data: Option<Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn error(mut self, error: RequestError) -> Self {
        self.error = Some(Some(error));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn optimistic(mut self, optimistic: bool) -> Self {
        self.is_optimistic = Some(optimistic);
        self
    }

    pub fn stale(mut self, stale: bool) -> Self {
        self.is_stale = Some(stale);
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Stamp with the current wall-clock time.
    pub fn now(self) -> Self {
        self.timestamp(now_millis())
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn self_tag(mut self, tag: Option<String>) -> Self {
        self.self_tag = Some(tag);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.push((key.into(), value));
        self
    }

    pub fn previous_data(mut self, data: Option<Value>) -> Self {
        self.previous_data = Some(data);
        self
    }

    fn supplies_result(&self) -> bool {
        matches!(self.data, Some(Some(_))) || matches!(self.error, Some(Some(_)))
    }

    fn apply(self, entry: &mut CacheEntry) {
        let state = &mut entry.state;
        if let Some(v) = self.loading {
            state.loading = v;
        }
        if let Some(v) = self.fetching {
            state.fetching = v;
        }
        if let Some(v) = self.data {
            state.data = v;
        }
        if let Some(v) = self.error {
            state.error = v;
        }
        if let Some(v) = self.is_optimistic {
            state.is_optimistic = v;
        }
        if let Some(v) = self.is_stale {
            state.is_stale = v;
        }
        if let Some(v) = self.timestamp {
            state.timestamp = v;
        }
        if let Some(tags) = self.tags {
            entry.tags = dedup_ordered(tags);
        }
        if let Some(tag) = self.self_tag {
            entry.self_tag = tag;
        }
        for (k, v) in self.meta {
            entry.meta.insert(k, v);
        }
        if let Some(v) = self.previous_data {
            entry.previous_data = v;
        }
    }
}

fn dedup_ordered(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Callback invoked with the entry snapshot after every write to its key.
pub type CacheListener = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

#[derive(Default)]
struct Slot {
    entry: CacheEntry,
    subscribers: Vec<(u64, CacheListener)>,
}

struct Inner {
    entries: Mutex<BTreeMap<String, Slot>>,
    pending: PromiseCache,
    next_subscriber: AtomicU64,
}

/// Cheap-clone handle to a shared cache store.
///
/// Tag lookups scan entries in key order, so "first match" is
/// deterministic.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(BTreeMap::new()),
                pending: PromiseCache::new(),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    fn snapshot(&self, slot: &Slot, key: &str) -> CacheEntry {
        let mut entry = slot.entry.clone();
        entry.pending_promise = self.inner.pending.get(key);
        entry.subscriber_count = slot.subscribers.len();
        entry
    }

    /// Snapshot of the entry for `key`, if it exists.
    pub fn get_cache(&self, key: &str) -> Option<CacheEntry> {
        let entries = mutex_lock(&self.inner.entries, SOURCE, "get_cache");
        entries.get(key).map(|slot| self.snapshot(slot, key))
    }

    /// Merge `patch` into the entry for `key` (creating it if needed) and
    /// notify its subscribers.
    pub fn set_cache(&self, key: &str, patch: CachePatch) {
        let clears_pending = patch.supplies_result();
        let (mut snapshot, listeners) = {
            let mut entries = mutex_lock(&self.inner.entries, SOURCE, "set_cache");
            let slot = entries.entry(key.to_owned()).or_default();
            patch.apply(&mut slot.entry);
            let listeners: Vec<CacheListener> =
                slot.subscribers.iter().map(|(_, l)| l.clone()).collect();
            (self.snapshot(slot, key), listeners)
        };
        if clears_pending {
            self.inner.pending.remove(key);
            snapshot.pending_promise = None;
        }

        trace!(key, subscribers = listeners.len(), "cache entry updated");
        for listener in listeners {
            listener(&snapshot);
        }
    }

    /// Remove the entry for `key` together with its subscribers and pending
    /// request.
    pub fn delete_cache(&self, key: &str) {
        mutex_lock(&self.inner.entries, SOURCE, "delete_cache").remove(key);
        self.inner.pending.remove(key);
    }

    /// Subscribe to writes on `key`. Creates an empty entry if absent.
    pub fn subscribe_cache(&self, key: &str, listener: CacheListener) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        mutex_lock(&self.inner.entries, SOURCE, "subscribe_cache")
            .entry(key.to_owned())
            .or_default()
            .subscribers
            .push((id, listener));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let key = key.to_owned();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut entries = mutex_lock(&inner.entries, SOURCE, "unsubscribe");
                if let Some(slot) = entries.get_mut(&key) {
                    slot.subscribers.retain(|(existing, _)| *existing != id);
                }
            }
        })
    }

    /// First entry (in key order) sharing a tag with `tags` and holding data.
    pub fn get_cache_by_tags(&self, tags: &[String]) -> Option<CacheEntry> {
        let entries = mutex_lock(&self.inner.entries, SOURCE, "get_cache_by_tags");
        entries
            .iter()
            .find(|(_, slot)| slot.entry.has_any_tag(tags) && slot.entry.state.data.is_some())
            .map(|(key, slot)| self.snapshot(slot, key))
    }

    /// Every entry sharing a tag with `tags`, with its key.
    pub fn get_cache_entries_by_tags(&self, tags: &[String]) -> Vec<(String, CacheEntry)> {
        let entries = mutex_lock(&self.inner.entries, SOURCE, "get_cache_entries_by_tags");
        entries
            .iter()
            .filter(|(_, slot)| slot.entry.has_any_tag(tags))
            .map(|(key, slot)| (key.clone(), self.snapshot(slot, key)))
            .collect()
    }

    /// Every entry whose own path tag equals `tag`.
    pub fn get_cache_entries_by_self_tag(&self, tag: &str) -> Vec<(String, CacheEntry)> {
        let entries = mutex_lock(&self.inner.entries, SOURCE, "entries_by_self_tag");
        entries
            .iter()
            .filter(|(_, slot)| slot.entry.self_tag.as_deref() == Some(tag))
            .map(|(key, slot)| (key.clone(), self.snapshot(slot, key)))
            .collect()
    }

    /// Flag every entry sharing a tag with `tags` as stale. Returns the
    /// affected keys.
    pub fn mark_stale(&self, tags: &[String]) -> Vec<String> {
        let keys: Vec<String> = self
            .get_cache_entries_by_tags(tags)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in &keys {
            self.set_cache(key, CachePatch::new().stale(true));
        }
        keys
    }

    /// All keys currently held, in order.
    pub fn keys(&self) -> Vec<String> {
        mutex_lock(&self.inner.entries, SOURCE, "keys")
            .keys()
            .cloned()
            .collect()
    }

    /// Read-only copy of every entry, for inspection tools.
    pub fn entries(&self) -> Vec<(String, CacheEntry)> {
        let entries = mutex_lock(&self.inner.entries, SOURCE, "entries");
        entries
            .iter()
            .map(|(key, slot)| (key.clone(), self.snapshot(slot, key)))
            .collect()
    }

    /// Drop every entry, subscriber and pending request.
    pub fn clear(&self) {
        mutex_lock(&self.inner.entries, SOURCE, "clear").clear();
        self.inner.pending.clear();
    }

    /// The in-flight request for `key`, if any.
    pub fn pending(&self, key: &str) -> Option<PendingRequest> {
        self.inner.pending.get(key)
    }

    /// Register an in-flight request for `key`. See [`PromiseCache::store`].
    pub fn store_pending(
        &self,
        key: &str,
        future: BoxFuture<'static, Result<Response>>,
        timeout: Duration,
    ) -> PendingRequest {
        self.inner.pending.store(key, future, timeout)
    }

    /// Join the in-flight request for `key` or register the one `start`
    /// produces. See [`PromiseCache::join_or_store`].
    pub fn join_or_store_pending(
        &self,
        key: &str,
        timeout: Duration,
        start: impl FnOnce() -> BoxFuture<'static, Result<Response>>,
    ) -> (PendingRequest, bool) {
        self.inner.pending.join_or_store(key, timeout, start)
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn set_cache_merges_state_shallowly() {
        let store = CacheStore::new();
        store.set_cache("k", CachePatch::new().fetching(true).loading(true));
        store.set_cache("k", CachePatch::new().data(json!(1)).loading(false));

        let entry = store.get_cache("k").unwrap();
        assert!(entry.state.fetching);
        assert!(!entry.state.loading);
        assert_eq!(entry.state.data, Some(json!(1)));
    }

    #[test]
    fn tags_are_replaced_not_unioned() {
        let store = CacheStore::new();
        store.set_cache("k", CachePatch::new().tags(tags(&["a", "b", "a"])));
        assert_eq!(store.get_cache("k").unwrap().tags, tags(&["a", "b"]));

        store.set_cache("k", CachePatch::new().tags(tags(&["c"])));
        assert_eq!(store.get_cache("k").unwrap().tags, tags(&["c"]));
    }

    #[test]
    fn every_write_notifies_subscribers() {
        let store = CacheStore::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let sub = store.subscribe_cache(
            "k",
            Arc::new(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            }),
        );
        // Subscribing creates the entry.
        assert!(store.get_cache("k").is_some());
        assert_eq!(store.get_cache("k").unwrap().subscriber_count, 1);

        store.set_cache("k", CachePatch::new().fetching(true));
        store.set_cache("k", CachePatch::new().fetching(false));
        store.set_cache("other", CachePatch::new().fetching(true));
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        sub.unsubscribe();
        store.set_cache("k", CachePatch::new().stale(true));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_can_read_store_during_notification() {
        let store = CacheStore::new();
        let reader = store.clone();
        let observed = Arc::new(Mutex::new(None));
        let o = observed.clone();
        let _sub = store.subscribe_cache(
            "k",
            Arc::new(move |_| {
                *o.lock().unwrap() = reader.get_cache("k").and_then(|e| e.state.data);
            }),
        );
        store.set_cache("k", CachePatch::new().data(json!("v")));
        assert_eq!(*observed.lock().unwrap(), Some(json!("v")));
    }

    #[test]
    fn tag_lookups() {
        let store = CacheStore::new();
        store.set_cache("a", CachePatch::new().tags(tags(&["users"])));
        store.set_cache(
            "b",
            CachePatch::new().tags(tags(&["users", "users/1"])).data(json!({"id": 1})),
        );
        store.set_cache("c", CachePatch::new().tags(tags(&["posts"])).data(json!([])));

        let first = store.get_cache_by_tags(&tags(&["users"])).unwrap();
        assert_eq!(first.state.data, Some(json!({"id": 1})));

        let all = store.get_cache_entries_by_tags(&tags(&["users", "nothing"]));
        let keys: Vec<_> = all.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(store.get_cache_by_tags(&tags(&["nothing"])).is_none());
    }

    #[test]
    fn mark_stale_flags_overlapping_entries() {
        let store = CacheStore::new();
        store.set_cache("a", CachePatch::new().tags(tags(&["users"])).data(json!(1)));
        store.set_cache("b", CachePatch::new().tags(tags(&["posts"])).data(json!(2)));

        let keys = store.mark_stale(&tags(&["users"]));
        assert_eq!(keys, vec!["a"]);
        assert!(store.get_cache("a").unwrap().state.is_stale);
        assert!(!store.get_cache("b").unwrap().state.is_stale);
        assert_eq!(store.get_cache("a").unwrap().state.data, Some(json!(1)));
    }

    #[test]
    fn delete_and_clear() {
        let store = CacheStore::new();
        store.set_cache("a", CachePatch::new().data(json!(1)));
        store.set_cache("b", CachePatch::new().data(json!(2)));
        store.delete_cache("a");
        assert!(store.get_cache("a").is_none());
        assert_eq!(store.keys(), vec!["b"]);
        store.clear();
        assert!(store.entries().is_empty());
    }

    #[tokio::test]
    async fn supplying_data_clears_pending_request() {
        let store = CacheStore::new();
        store.store_pending(
            "k",
            Box::pin(futures_util::future::pending()),
            Duration::from_secs(30),
        );
        assert!(store.get_cache("k").is_none());
        assert!(store.pending("k").is_some());

        store.set_cache("k", CachePatch::new().fetching(true));
        assert!(store.get_cache("k").unwrap().pending_promise.is_some());

        store.set_cache("k", CachePatch::new().data(json!([])));
        assert!(store.pending("k").is_none());
        assert!(store.get_cache("k").unwrap().pending_promise.is_none());
    }
}
