//! Notification Batching
//!
//! Inside [`batch`], signals still change immediately but their listeners are
//! queued instead of run. When the outermost batch ends, each queued listener
//! runs once, in the order it was first queued. Listeners therefore never
//! observe a batch half-applied, and a subscriber woken by several cells of
//! one batch is woken once.
//!
//! The merge engine commits every merge inside a batch.
//!
//! Batches are per thread. Listeners run after the batch is closed, so a
//! listener that writes opens (and flushes) a batch of its own.

use std::cell::RefCell;

use indexmap::IndexMap;

use super::subscriber::{Listener, SubscriberId};

/// A queued listener is identified by its subscriber and the listener
/// allocation, so one registration is woken at most once per batch.
type QueueKey = (SubscriberId, usize);

#[derive(Default)]
struct BatchState {
    depth: usize,
    queued: IndexMap<QueueKey, Listener>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Run `f` with notifications deferred until it returns.
///
/// ```rust
/// use normcache_core::reactive::{batch, Signal, SubscriberId};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let (a, b) = (Signal::new(0), Signal::new(0));
/// let calls = Arc::new(AtomicUsize::new(0));
/// let id = SubscriberId::new();
/// let listener: Arc<dyn Fn() + Send + Sync> = {
///     let calls = calls.clone();
///     Arc::new(move || {
///         calls.fetch_add(1, Ordering::SeqCst);
///     })
/// };
/// a.subscribe_listener(id, listener.clone());
/// b.subscribe_listener(id, listener);
///
/// batch(|| {
///     a.set(1);
///     b.set(1);
///     assert_eq!(calls.load(Ordering::SeqCst), 0);
/// });
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _batch = BatchGuard::enter();
    f()
}

/// Whether a batch is open on this thread.
pub fn is_batching() -> bool {
    BATCH.with(|state| state.borrow().depth > 0)
}

/// Queue `listener` if a batch is open. Returns `false` when the caller
/// should run it now.
pub(crate) fn defer(subscriber_id: SubscriberId, listener: &Listener) -> bool {
    BATCH.with(|state| {
        let mut state = state.borrow_mut();
        if state.depth == 0 {
            return false;
        }
        let key = (subscriber_id, listener_address(listener));
        state
            .queued
            .entry(key)
            .or_insert_with(|| Listener::clone(listener));
        true
    })
}

fn listener_address(listener: &Listener) -> usize {
    std::sync::Arc::as_ptr(listener) as *const () as usize
}

struct BatchGuard;

impl BatchGuard {
    fn enter() -> Self {
        BATCH.with(|state| state.borrow_mut().depth += 1);
        BatchGuard
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let queued = BATCH.with(|state| {
            let mut state = state.borrow_mut();
            state.depth -= 1;
            if state.depth > 0 {
                return IndexMap::new();
            }
            std::mem::take(&mut state.queued)
        });

        // Unwinding out of a batch drops its notifications.
        if std::thread::panicking() {
            return;
        }
        for listener in queued.into_values() {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn counting_listener(count: &Arc<AtomicUsize>) -> Listener {
        let count = count.clone();
        Arc::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn listeners_run_after_batch() {
        let signal = Signal::new(0);
        let count = Arc::new(AtomicUsize::new(0));
        signal.subscribe_listener(SubscriberId::new(), counting_listener(&count));

        batch(|| {
            signal.set(1);
            signal.set(2);
            assert!(is_batching());
            assert_eq!(count.load(Ordering::SeqCst), 0);
        });

        assert!(!is_batching());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_see_final_state() {
        let (first, last) = (Signal::new("a"), Signal::new("a"));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let listener: Listener = {
            let (first, last, seen) = (first.clone(), last.clone(), seen.clone());
            Arc::new(move || seen.lock().unwrap().push((first.get(), last.get())))
        };
        let id = SubscriberId::new();
        first.subscribe_listener(id, listener.clone());
        last.subscribe_listener(id, listener);

        batch(|| {
            first.set("b");
            last.set("b");
        });
        assert_eq!(*seen.lock().unwrap(), vec![("b", "b")]);
    }

    #[test]
    fn nested_batches_flush_once_at_the_outermost() {
        let signal = Signal::new(0);
        let count = Arc::new(AtomicUsize::new(0));
        signal.subscribe_listener(SubscriberId::new(), counting_listener(&count));

        batch(|| {
            batch(|| {
                signal.set(1);
            });
            assert_eq!(count.load(Ordering::SeqCst), 0);
            signal.set(2);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_subscribers_each_run() {
        let signal = Signal::new(0);
        let count = Arc::new(AtomicUsize::new(0));
        signal.subscribe_listener(SubscriberId::new(), counting_listener(&count));
        signal.subscribe_listener(SubscriberId::new(), counting_listener(&count));

        batch(|| {
            signal.set(1);
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn batch_returns_value() {
        assert_eq!(batch(|| 7), 7);
    }
}
