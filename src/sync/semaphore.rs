//! FIFO counting semaphore.
//!
//! Unlike `tokio::sync::Semaphore`, permits are plain counters released
//! explicitly, the limit can be changed while waiters are queued, and
//! [`Semaphore::reset`] denies every waiter instead of closing the
//! semaphore. `acquire()` therefore resolves to a `bool` that callers must
//! check.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;

use super::mutex_lock;

const SOURCE: &str = "sync::semaphore";

struct State {
    current: usize,
    max: usize,
    waiters: VecDeque<oneshot::Sender<bool>>,
}

impl State {
    /// Hand a permit to the oldest live waiter. Returns false when the
    /// queue is exhausted.
    fn admit_one(&mut self) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            self.current += 1;
            if waiter.send(true).is_ok() {
                return true;
            }
            // Waiter gave up before being admitted.
            self.current -= 1;
        }
        false
    }
}

/// A queued `acquire` call.
struct Waiter<'a> {
    semaphore: &'a Semaphore,
    rx: oneshot::Receiver<bool>,
    settled: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Refuse further grants, then return one that raced the cancellation.
        self.rx.close();
        if let Ok(true) = self.rx.try_recv() {
            self.semaphore.release();
        }
    }
}

/// Bounded FIFO admission control.
///
/// Invariant: `current() <= max()` except transiently after
/// [`set_concurrency`](Self::set_concurrency) shrinks the limit, in which
/// case already-held permits are kept and no new ones are granted until
/// enough are released.
pub struct Semaphore {
    state: Mutex<State>,
}

impl Semaphore {
    /// Create a semaphore admitting at most `max` concurrent holders.
    pub fn new(max: usize) -> Self {
        Self {
            state: Mutex::new(State {
                current: 0,
                max,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Wait for a permit.
    ///
    /// Resolves to `true` once admitted, or `false` if the semaphore was
    /// [`reset`](Self::reset) while waiting. Cancel-safe: dropping the
    /// future gives back a permit granted after the caller stopped waiting.
    pub async fn acquire(&self) -> bool {
        let rx = {
            let mut state = mutex_lock(&self.state, SOURCE, "acquire");
            if state.current < state.max {
                state.current += 1;
                return true;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        let mut waiter = Waiter {
            semaphore: self,
            rx,
            settled: false,
        };
        let admitted = (&mut waiter.rx).await.unwrap_or(false);
        waiter.settled = true;
        admitted
    }

    /// Return a permit. If waiters are queued and the limit allows it, the
    /// oldest one is admitted immediately.
    pub fn release(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "release");
        state.current = state.current.saturating_sub(1);
        if state.current < state.max {
            state.admit_one();
        }
    }

    /// Change the limit.
    ///
    /// Growing admits up to `new_max - old_max` queued waiters right away.
    /// Shrinking only affects future admissions.
    pub fn set_concurrency(&self, new_max: usize) {
        let mut state = mutex_lock(&self.state, SOURCE, "set_concurrency");
        let old_max = state.max;
        state.max = new_max;
        let mut budget = new_max.saturating_sub(old_max);
        while budget > 0 && state.current < state.max {
            if !state.admit_one() {
                break;
            }
            budget -= 1;
        }
    }

    /// Deny every queued waiter (they resolve to `false`) and zero the
    /// holder count.
    pub fn reset(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "reset");
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(false);
        }
        state.current = 0;
    }

    /// Number of permits currently held.
    pub fn current(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "current").current
    }

    /// Current limit.
    pub fn max(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "max").max
    }

    /// Number of queued waiters.
    pub fn waiting(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "waiting").waiters.len()
    }

    /// Permits that could be granted without waiting.
    pub fn available(&self) -> usize {
        let state = mutex_lock(&self.state, SOURCE, "available");
        state.max.saturating_sub(state.current)
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = mutex_lock(&self.state, SOURCE, "debug");
        f.debug_struct("Semaphore")
            .field("current", &state.current)
            .field("max", &state.max)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn acquire_is_immediate_below_limit() {
        let sem = Semaphore::new(2);
        assert!(sem.acquire().await);
        assert!(sem.acquire().await);
        assert_eq!(sem.current(), 2);
        assert_eq!(sem.available(), 0);
    }

    #[tokio::test]
    async fn shrinking_does_not_preempt() {
        let sem = Arc::new(Semaphore::new(2));
        assert!(sem.acquire().await);
        assert!(sem.acquire().await);
        sem.set_concurrency(1);
        assert_eq!(sem.current(), 2);

        let waiter = tokio::spawn({
            let sem = sem.clone();
            async move { sem.acquire().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(sem.waiting(), 1);

        // 2 -> 1 held: still at the new limit, nobody admitted.
        sem.release();
        tokio::task::yield_now().await;
        assert_eq!(sem.waiting(), 1);

        sem.release();
        assert!(waiter.await.unwrap());
        assert_eq!(sem.current(), 1);
    }

    #[tokio::test]
    async fn dropped_waiter_is_skipped() {
        let sem = Arc::new(Semaphore::new(1));
        assert!(sem.acquire().await);

        let abandoned = tokio::spawn({
            let sem = sem.clone();
            async move { sem.acquire().await }
        });
        tokio::task::yield_now().await;
        abandoned.abort();
        let _ = abandoned.await;

        let live = tokio::spawn({
            let sem = sem.clone();
            async move { sem.acquire().await }
        });
        tokio::task::yield_now().await;

        sem.release();
        assert!(live.await.unwrap());
        assert_eq!(sem.current(), 1);
    }

    #[test]
    fn permit_granted_to_a_dropped_waiter_is_returned() {
        let sem = Semaphore::new(1);
        assert!(tokio_test::block_on(sem.acquire()));

        let mut waiter = tokio_test::task::spawn(sem.acquire());
        assert!(waiter.poll().is_pending());

        sem.release();
        assert_eq!(sem.current(), 1, "handed to the queued waiter");

        drop(waiter);
        assert_eq!(sem.current(), 0);
        assert_eq!(sem.available(), 1);
    }
}
