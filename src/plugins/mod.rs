//! Built-in plugins.
//!
//! Each plugin keeps its state (timers, last-call instants) on its own
//! instance, so two clients never share it. Per-call behaviour is
//! selected through typed [`PluginOptions`](crate::PluginOptions) values:
//!
//! | plugin         | operation | option                          |
//! |----------------|-----------|---------------------------------|
//! | `invalidation` | write     | [`Invalidate`]                  |
//! | `optimistic`   | write     | [`Optimistic`]                  |
//! | `debounce`     | read      | [`Debounce`]                    |
//! | `throttle`     | read      | [`Throttle`]                    |
//! | `polling`      | read      | [`Polling`]                     |

pub mod debounce;
pub mod invalidation;
pub mod optimistic;
pub mod polling;
pub mod throttle;

pub use debounce::{Debounce, DebouncePlugin};
pub use invalidation::{
    Invalidate, InvalidateTarget, InvalidationHandle, InvalidationMode, InvalidationPlugin,
};
pub use optimistic::{Optimistic, OptimisticPlugin, OptimisticTarget};
pub use polling::{Polling, PollingPlugin};
pub use throttle::{Throttle, ThrottlePlugin};
