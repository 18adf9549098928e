//! Cell Contracts
//!
//! The store never talks to [`Signal`] directly. It holds field cells behind
//! [`ReactiveCell`] and creates them through a [`CellAdapter`], so a different
//! reactivity runtime can back the cache by supplying its own adapter.
//!
//! Anything that can notify (field cells, per-entity version signals) is an
//! [`Observable`]; that is all the tracking context and watchers need.

use std::fmt;
use std::sync::Arc;

use crate::value::FieldSlot;

use super::signal::Signal;
use super::subscriber::{Listener, SubscriberId};

/// Something listeners can attach to.
pub trait Observable: Send + Sync {
    /// Identifier, unique among all observables in the process.
    fn observable_id(&self) -> u64;

    /// Register `listener` under `subscriber_id`, replacing any listener
    /// already registered under the same id.
    fn subscribe(&self, subscriber_id: SubscriberId, listener: Listener);

    fn unsubscribe(&self, subscriber_id: SubscriberId);

    fn subscriber_count(&self) -> usize;
}

/// A field cell: one value slot with change notification.
///
/// `get` is a raw read. Dependency tracking happens in the read views, which
/// report the cell to the [`ReactiveContext`](super::ReactiveContext).
pub trait ReactiveCell: Observable {
    fn get(&self) -> FieldSlot;

    /// Store `next`. Returns `false`, without notifying, when the cell's
    /// equality policy considers `next` equal to the current value.
    fn set(&self, next: FieldSlot) -> bool;

    /// The same cell as a plain observable.
    fn into_observable(self: Arc<Self>) -> Arc<dyn Observable>;
}

/// Shared handle to a field cell.
pub type CellRef = Arc<dyn ReactiveCell>;

/// Decides whether a `set` is a change worth notifying about.
#[derive(Clone, Default)]
pub enum Equality {
    /// Compare by value: scalars by value, references by key, lists and
    /// objects element-wise.
    #[default]
    Structural,
    /// Nothing is ever equal; every `set` notifies.
    NeverEqual,
    /// Caller-supplied comparison, e.g. to treat some fields specially.
    Custom(Arc<dyn Fn(&FieldSlot, &FieldSlot) -> bool + Send + Sync>),
}

impl Equality {
    pub fn custom<F>(equals: F) -> Self
    where
        F: Fn(&FieldSlot, &FieldSlot) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(equals))
    }

    pub fn equals(&self, current: &FieldSlot, next: &FieldSlot) -> bool {
        match self {
            Equality::Structural => current == next,
            Equality::NeverEqual => false,
            Equality::Custom(equals) => equals(current, next),
        }
    }
}

impl fmt::Debug for Equality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Equality::Structural => f.write_str("Structural"),
            Equality::NeverEqual => f.write_str("NeverEqual"),
            Equality::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Creates field cells for the store.
///
/// Closures `Fn(FieldSlot, &Equality) -> CellRef` are adapters too.
pub trait CellAdapter: Send + Sync {
    fn create(&self, initial: FieldSlot, equality: &Equality) -> CellRef;
}

impl<F> CellAdapter for F
where
    F: Fn(FieldSlot, &Equality) -> CellRef + Send + Sync,
{
    fn create(&self, initial: FieldSlot, equality: &Equality) -> CellRef {
        self(initial, equality)
    }
}

/// Default adapter: every field is a [`Signal`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalAdapter;

impl CellAdapter for SignalAdapter {
    fn create(&self, initial: FieldSlot, equality: &Equality) -> CellRef {
        let equality = equality.clone();
        Arc::new(Signal::with_equality(initial, move |current, next| {
            equality.equals(current, next)
        }))
    }
}

impl<T> Observable for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn observable_id(&self) -> u64 {
        self.id()
    }

    fn subscribe(&self, subscriber_id: SubscriberId, listener: Listener) {
        Signal::subscribe_listener(self, subscriber_id, listener);
    }

    fn unsubscribe(&self, subscriber_id: SubscriberId) {
        Signal::unsubscribe(self, subscriber_id);
    }

    fn subscriber_count(&self) -> usize {
        Signal::subscriber_count(self)
    }
}

impl ReactiveCell for Signal<FieldSlot> {
    fn get(&self) -> FieldSlot {
        Signal::get(self)
    }

    fn set(&self, next: FieldSlot) -> bool {
        Signal::set(self, next)
    }

    fn into_observable(self: Arc<Self>) -> Arc<dyn Observable> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(cell: &CellRef) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        cell.subscribe(
            SubscriberId::new(),
            Arc::new(move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        count
    }

    #[test]
    fn structural_equality_suppresses_noop_sets() {
        let cell = SignalAdapter.create(None, &Equality::Structural);
        let count = counting(&cell);

        assert!(cell.set(Some(FieldValue::string("a"))));
        assert!(!cell.set(Some(FieldValue::string("a"))));
        assert!(cell.set(Some(FieldValue::null())));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn never_equal_always_notifies() {
        let cell = SignalAdapter.create(Some(FieldValue::string("a")), &Equality::NeverEqual);
        let count = counting(&cell);

        cell.set(Some(FieldValue::string("a")));
        cell.set(Some(FieldValue::string("a")));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn custom_equality_is_consulted() {
        // Treat any two strings as equal.
        let equality = Equality::custom(|current, next| {
            matches!(
                (current, next),
                (
                    Some(FieldValue::Scalar(crate::value::Scalar::String(_))),
                    Some(FieldValue::Scalar(crate::value::Scalar::String(_)))
                )
            )
        });
        let cell = SignalAdapter.create(Some(FieldValue::string("a")), &equality);
        let count = counting(&cell);

        assert!(!cell.set(Some(FieldValue::string("b"))));
        assert_eq!(cell.get(), Some(FieldValue::string("a")));
        assert!(cell.set(Some(FieldValue::null())));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closures_are_adapters() {
        let created = Arc::new(AtomicUsize::new(0));
        let created_clone = created.clone();
        let adapter = move |initial: FieldSlot, equality: &Equality| -> CellRef {
            created_clone.fetch_add(1, Ordering::SeqCst);
            SignalAdapter.create(initial, equality)
        };

        let cell = adapter.create(None, &Equality::default());
        assert_eq!(cell.get(), None);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cells_upcast_to_observables() {
        let cell = SignalAdapter.create(None, &Equality::default());
        let id = cell.observable_id();
        let observable = cell.clone().into_observable();
        assert_eq!(observable.observable_id(), id);
    }
}
