//! Watcher Implementation
//!
//! A Watcher is a side-effecting computation that re-runs whenever a field
//! it read changes. It is the piece a framework binding uses to schedule
//! re-renders.
//!
//! # How Watchers Work
//!
//! 1. When created, the watcher runs its function inside a
//!    [`ReactiveContext`]. Every cell the function reads through a read view
//!    is recorded.
//!
//! 2. The watcher subscribes to exactly those cells. Fields it did not read
//!    can change freely without waking it.
//!
//! 3. When one of them notifies, the watcher runs again and reconciles its
//!    subscriptions against the new set of reads: fields no longer read are
//!    unsubscribed, newly read ones subscribed.
//!
//! # Re-entrancy
//!
//! Notifications are synchronous, so a watcher can be woken while it is still
//! running (its own function wrote to a cache it reads). Such a wake-up is
//! recorded and served by one more pass after the current run finishes.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use super::cell::Observable;
use super::context::ReactiveContext;
use super::subscriber::{Listener, SubscriberId};

/// Counter for generating unique watcher IDs.
static WATCHER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_watcher_id() -> u64 {
    WATCHER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A computation that re-runs when the fields it read change.
///
/// Clones share the same computation. When the last handle is dropped the
/// watcher unsubscribes from everything.
///
/// # Example
///
/// ```rust
/// use normcache_core::client::Client;
/// use normcache_core::reactive::Watcher;
/// use serde_json::json;
///
/// let client = Client::default();
/// client.write(&json!({"__typename": "Person", "id": "1", "name": "Chris"})).unwrap();
///
/// let person = client.read("Person:1");
/// let watcher = Watcher::new(move || {
///     let _ = person.get("name");
/// });
///
/// client.write(&json!({"__typename": "Person", "id": "1", "name": "Kit"})).unwrap();
/// assert_eq!(watcher.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

struct WatcherInner {
    /// Unique identifier for this watcher.
    id: u64,

    /// The subscriber ID used for dependency tracking.
    subscriber_id: SubscriberId,

    /// The watcher function.
    run: Box<dyn Fn() + Send + Sync>,

    /// Observables read during the last run, keyed by observable id.
    subscriptions: Mutex<IndexMap<u64, Arc<dyn Observable>>>,

    /// Whether the watcher has been disposed.
    disposed: AtomicBool,

    /// Set while the function is executing.
    running: AtomicBool,

    /// A wake-up arrived while running.
    pending: AtomicBool,

    /// Number of times the function has run.
    run_count: AtomicUsize,

    /// Registered on every observable this watcher reads. A single
    /// allocation, so a batch wakes the watcher once however many of its
    /// reads changed.
    listener: Listener,
}

impl Watcher {
    /// Create a new watcher with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let watcher = Self::new_lazy(run);
        watcher.execute();
        watcher
    }

    /// Create a new watcher without running it.
    ///
    /// It has no dependencies until [`execute`](Self::execute) is called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|weak: &Weak<WatcherInner>| {
            let weak = weak.clone();
            let listener: Listener = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    WatcherInner::schedule(&inner);
                }
            });
            WatcherInner {
                id: next_watcher_id(),
                subscriber_id: SubscriberId::new(),
                run: Box::new(run),
                subscriptions: Mutex::new(IndexMap::new()),
                disposed: AtomicBool::new(false),
                running: AtomicBool::new(false),
                pending: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
                listener,
            }
        });
        Self { inner }
    }

    /// Get the watcher's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the subscriber ID for this watcher.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Run the function now and refresh subscriptions.
    pub fn execute(&self) {
        WatcherInner::schedule(&self.inner);
    }

    /// Dispose of the watcher.
    ///
    /// After disposal, the watcher will not run again and holds no
    /// subscriptions.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.release();
    }

    /// Check if the watcher has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the function has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of observables currently subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }
}

impl WatcherInner {
    /// Run, or queue a follow-up pass if a run is already in progress.
    fn schedule(this: &Arc<Self>) {
        if this.disposed.load(Ordering::SeqCst) {
            return;
        }
        if this.running.swap(true, Ordering::SeqCst) {
            this.pending.store(true, Ordering::SeqCst);
            return;
        }
        let _running = RunningGuard(this);

        loop {
            this.run_once();
            let again = this.pending.swap(false, Ordering::SeqCst);
            if !again || this.disposed.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    fn run_once(self: &Arc<Self>) {
        let dependencies = {
            let ctx = ReactiveContext::enter(self.subscriber_id);
            (self.run)();
            ctx.take_dependencies()
        };
        let runs = self.run_count.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(watcher = self.id, runs, reads = dependencies.len(), "watcher ran");

        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|id, observable| {
            let keep = dependencies.contains_key(id);
            if !keep {
                observable.unsubscribe(self.subscriber_id);
            }
            keep
        });

        for (id, observable) in dependencies {
            if subscriptions.contains_key(&id) {
                continue;
            }
            observable.subscribe(self.subscriber_id, Arc::clone(&self.listener));
            subscriptions.insert(id, observable);
        }
    }

    fn release(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for observable in subscriptions.values() {
            observable.unsubscribe(self.subscriber_id);
        }
    }
}

/// Clears `running` when a run ends, including by panic, so the watcher
/// can be scheduled again.
struct RunningGuard<'a>(&'a WatcherInner);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.pending.store(false, Ordering::SeqCst);
        self.0.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
