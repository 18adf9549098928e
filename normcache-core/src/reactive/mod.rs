//! Reactive Primitives
//!
//! This module implements the reactive layer under the entity store: signal
//! cells, the tracking context, subscriptions and watchers.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`Signal`] is a container for mutable state. When its value changes, all
//! listeners are notified synchronously. Setting an equal value is a no-op.
//!
//! ## Cells
//!
//! Every entity field lives in a cell. The store only depends on the
//! [`ReactiveCell`] contract and obtains cells from a [`CellAdapter`], so other
//! reactivity runtimes can be plugged in. The default adapter builds signals.
//!
//! ## Watchers
//!
//! A [`Watcher`] runs a function, records which cells it read, and re-runs
//! when one of them changes. Consumers that did not read a field are never
//! woken by it.
//!
//! ## Batches
//!
//! Listeners normally run as soon as a cell changes. Merges open a
//! [`batch`](fn@batch) so that listeners run once, after every cell of the merge has
//! been written.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local [`ReactiveContext`] stack. Read
//! views report every cell they touch to the innermost context; watchers turn
//! those reports into subscriptions.

mod batch;
mod cell;
mod context;
mod signal;
mod subscriber;
mod watcher;

pub use batch::{batch, is_batching};
pub use cell::{CellAdapter, CellRef, Equality, Observable, ReactiveCell, SignalAdapter};
pub use context::ReactiveContext;
pub use signal::Signal;
pub use subscriber::{Listener, SubscriberId, Subscription, WeakSubscription};
pub use watcher::Watcher;
