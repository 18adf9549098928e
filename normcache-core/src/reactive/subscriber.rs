//! Subscriber types for the reactive system.
//!
//! A subscriber is anything that listens to observables: a watcher, a read
//! view's subscription, or a framework binding outside this crate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::cell::Observable;

/// Unique identifier for a subscriber.
///
/// Each subscriber gets a unique ID when created. Observables key their
/// listeners by it, so one subscriber never holds two registrations on the
/// same observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Notification callback. It receives no arguments; listeners read the
/// current value themselves.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Handle to one or more listener registrations.
///
/// All targets share one listener. A subscription can grow after it is
/// attached (see [`WeakSubscription`]). Dropping the handle unsubscribes
/// from every target.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

struct SubscriptionState {
    subscriber_id: SubscriberId,
    listener: Listener,
    /// `None` once unsubscribed.
    targets: Mutex<Option<Vec<Arc<dyn Observable>>>>,
}

impl SubscriptionState {
    fn add(&self, target: Arc<dyn Observable>) -> bool {
        let mut targets = self.targets.lock();
        let Some(targets) = targets.as_mut() else {
            return false;
        };
        let id = target.observable_id();
        if targets.iter().any(|t| t.observable_id() == id) {
            return false;
        }
        target.subscribe(self.subscriber_id, Arc::clone(&self.listener));
        targets.push(target);
        true
    }
}

impl Subscription {
    /// Register `listener` on every target under a fresh subscriber id.
    pub fn attach(targets: Vec<Arc<dyn Observable>>, listener: Listener) -> Self {
        Self::attach_with(targets, |_| listener)
    }

    /// Like [`attach`](Self::attach), but the listener is built from a weak
    /// handle to the subscription, so it can add targets when it runs.
    pub fn attach_with<F>(targets: Vec<Arc<dyn Observable>>, build: F) -> Self
    where
        F: FnOnce(WeakSubscription) -> Listener,
    {
        let subscriber_id = SubscriberId::new();
        let state = Arc::new_cyclic(|weak: &Weak<SubscriptionState>| SubscriptionState {
            subscriber_id,
            listener: build(WeakSubscription {
                state: weak.clone(),
            }),
            targets: Mutex::new(Some(Vec::with_capacity(targets.len()))),
        });
        for target in targets {
            state.add(target);
        }
        Self { state }
    }

    pub fn subscriber_id(&self) -> SubscriberId {
        self.state.subscriber_id
    }

    /// Add another observable. Returns `false` if it is already a target.
    pub fn add(&self, target: Arc<dyn Observable>) -> bool {
        self.state.add(target)
    }

    /// Number of observables this subscription listens to.
    pub fn target_count(&self) -> usize {
        self.state.targets.lock().as_ref().map_or(0, Vec::len)
    }

    /// Unsubscribe now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let targets = self.state.targets.lock().take().unwrap_or_default();
        for target in targets {
            target.unsubscribe(self.state.subscriber_id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber_id", &self.state.subscriber_id)
            .field("targets", &self.target_count())
            .finish()
    }
}

/// Non-owning handle to a [`Subscription`], handed to its listener.
#[derive(Clone)]
pub struct WeakSubscription {
    state: Weak<SubscriptionState>,
}

impl WeakSubscription {
    /// Add a target if the subscription is still live and does not
    /// already listen to it.
    pub fn add(&self, target: Arc<dyn Observable>) -> bool {
        self.state.upgrade().is_some_and(|state| state.add(target))
    }
}

impl fmt::Debug for WeakSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSubscription")
            .field("live", &(self.state.strong_count() > 0))
            .finish()
    }
}
