//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! notifies listeners when that value changes.
//!
//! # How Signals Work
//!
//! 1. Listeners register under a [`SubscriberId`].
//!
//! 2. `set` compares the new value with the current one using the signal's
//!    equality function. Equal values are dropped without notification.
//!
//! 3. Otherwise the value is replaced and every listener runs, synchronously,
//!    in subscription order, before `set` returns. Inside a
//!    [`batch`](fn@super::batch) listeners run when the batch closes instead.
//!
//! # Re-entrancy
//!
//! The listener list is snapshotted and all locks are released before any
//! listener runs. A listener may therefore read the signal, set it again, or
//! (un)subscribe. Re-entrant `set` loops terminate once a listener writes a
//! value equal to the current one.
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A unique ID (8 bytes)
//! - The value behind an Arc'd lock, shared by clones
//! - The equality function
//! - The listener list

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::batch;
use super::subscriber::{Listener, SubscriberId};

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique signal ID.
fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type EqualityFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A reactive signal holding a value of type T.
///
/// Clones share the value and the listeners.
///
/// # Example
///
/// ```rust
/// use normcache_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert!(count.set(5));
/// assert!(!count.set(5)); // equal value, no notification
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Unique identifier for this signal.
    id: u64,

    /// The current value.
    value: Arc<RwLock<T>>,

    /// Returns true when two values should be treated as the same.
    equals: EqualityFn<T>,

    /// Listeners in subscription order.
    notifiers: Arc<RwLock<Vec<(SubscriberId, Listener)>>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new signal compared with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, |current, next| current == next)
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with a custom equality function.
    pub fn with_equality<F>(value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            id: next_signal_id(),
            value: Arc::new(RwLock::new(value)),
            equals: Arc::new(equals),
            notifiers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Set a new value and notify subscribers.
    ///
    /// Returns `false` (and notifies nobody) if the value is equal to the
    /// current one.
    pub fn set(&self, value: T) -> bool {
        {
            let mut guard = self.value.write();
            if (self.equals)(&*guard, &value) {
                return false;
            }
            *guard = value;
        }

        self.notify_subscribers();
        true
    }

    /// Update the value using a function.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.value.read();
            f(&*guard)
        };
        self.set(new_value)
    }

    /// Register a notification callback for a subscriber.
    pub fn subscribe<F>(&self, subscriber_id: SubscriberId, notify: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe_listener(subscriber_id, Arc::new(notify));
    }

    /// Register an already shared listener. A second registration under the
    /// same subscriber replaces the first, keeping its position.
    pub fn subscribe_listener(&self, subscriber_id: SubscriberId, listener: Listener) {
        let mut notifiers = self.notifiers.write();
        match notifiers.iter_mut().find(|(id, _)| *id == subscriber_id) {
            Some(entry) => entry.1 = listener,
            None => notifiers.push((subscriber_id, listener)),
        }
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.notifiers
            .write()
            .retain(|(id, _)| *id != subscriber_id);
    }

    /// Notify all subscribers that the value has changed. Inside a
    /// [`batch`](fn@super::batch) the listeners are queued instead.
    fn notify_subscribers(&self) {
        let listeners: Vec<(SubscriberId, Listener)> = self
            .notifiers
            .read()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (subscriber_id, listener) in listeners {
            if !batch::defer(subscriber_id, &listener) {
                listener();
            }
        }
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.notifiers.read().len()
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            equals: Arc::clone(&self.equals),
            notifiers: Arc::clone(&self.notifiers),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
