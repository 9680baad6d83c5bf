//! In-process event bus.
//!
//! Plugins and controllers communicate through two events: `refetch`
//! (a specific query key should run again) and `invalidate` (entries with
//! overlapping tags are stale). Listeners run synchronously inside
//! [`EventEmitter::emit`], after the listener table lock is released, so a
//! listener may itself subscribe, unsubscribe or emit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::sync::{Subscription, mutex_lock};

const SOURCE: &str = "events";

/// Why a refetch was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchReason {
    Polling,
    Debounce,
    Invalidated,
}

/// Events carried by the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Refetch {
        query_key: String,
        reason: RefetchReason,
    },
    /// Deduplicated list of invalidated tags.
    Invalidate(Vec<String>),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Refetch { .. } => EventKind::Refetch,
            Event::Invalidate(_) => EventKind::Invalidate,
        }
    }
}

/// Discriminant used to register listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Refetch,
    Invalidate,
}

/// Event callback. Identity (for [`EventEmitter::off`]) is the `Arc` pointer.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

struct Inner {
    listeners: Mutex<HashMap<EventKind, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
}

/// Cheap-clone handle to a shared event bus.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<Inner>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a listener for one event kind.
    pub fn on(&self, kind: EventKind, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        mutex_lock(&self.inner.listeners, SOURCE, "on")
            .entry(kind)
            .or_default()
            .push((id, listener));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut listeners = mutex_lock(&inner.listeners, SOURCE, "unsubscribe");
                if let Some(list) = listeners.get_mut(&kind) {
                    list.retain(|(existing, _)| *existing != id);
                }
            }
        })
    }

    /// Remove a listener by identity.
    pub fn off(&self, kind: EventKind, listener: &Listener) {
        let mut listeners = mutex_lock(&self.inner.listeners, SOURCE, "off");
        if let Some(list) = listeners.get_mut(&kind) {
            list.retain(|(_, existing)| !Arc::ptr_eq(existing, listener));
        }
    }

    /// Deliver an event to every listener registered for its kind.
    pub fn emit(&self, event: &Event) {
        let snapshot: Vec<Listener> = mutex_lock(&self.inner.listeners, SOURCE, "emit")
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        debug!(event = ?event, listeners = snapshot.len(), "emitting event");
        for listener in snapshot {
            listener(event);
        }
    }

    /// Drop every listener.
    pub fn clear(&self) {
        mutex_lock(&self.inner.listeners, SOURCE, "clear").clear();
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        mutex_lock(&self.inner.listeners, SOURCE, "listener_count")
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            count,
            Arc::new(move |_: &Event| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn emit_reaches_only_matching_kind() {
        let bus = EventEmitter::new();
        let (count, listener) = counter();
        let _sub = bus.on(EventKind::Invalidate, listener);

        bus.emit(&Event::Refetch {
            query_key: "k".into(),
            reason: RefetchReason::Polling,
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.emit(&Event::Invalidate(vec!["users".into()]));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_and_off_detach() {
        let bus = EventEmitter::new();
        let (count, listener) = counter();
        let sub = bus.on(EventKind::Invalidate, listener.clone());
        let _other = bus.on(EventKind::Invalidate, listener.clone());
        assert_eq!(bus.listener_count(EventKind::Invalidate), 2);

        sub.unsubscribe();
        assert_eq!(bus.listener_count(EventKind::Invalidate), 1);

        bus.off(EventKind::Invalidate, &listener);
        assert_eq!(bus.listener_count(EventKind::Invalidate), 0);

        bus.emit(&Event::Invalidate(vec![]));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_may_unsubscribe_during_emit() {
        let bus = EventEmitter::new();
        let bus2 = bus.clone();
        let _sub = bus.on(
            EventKind::Refetch,
            Arc::new(move |_| bus2.clear()),
        );
        bus.emit(&Event::Refetch {
            query_key: "k".into(),
            reason: RefetchReason::Polling,
        });
        assert_eq!(bus.listener_count(EventKind::Refetch), 0);
    }
}
