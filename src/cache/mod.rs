//! Caching subsystem.
//!
//! Two cooperating caches:
//!
//! - [`CacheStore`]: subscribable key → entry map holding operation state,
//!   tags and optimistic snapshots. Entries are created lazily and never
//!   evicted automatically.
//!
//! - [`PromiseCache`]: in-flight request table used for deduplication.
//!   Owned by the store; each [`CacheEntry`] snapshot exposes the current
//!   pending request, if any.

pub mod pending;
pub mod store;

pub use pending::{DEFAULT_PROMISE_TIMEOUT, PendingRequest, PromiseCache, SharedResponse};
pub use store::{CacheEntry, CacheListener, CachePatch, CacheStore, OperationState};
