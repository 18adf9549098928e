//! Client Façade
//!
//! The entry point applications use: hand it parsed responses, get back
//! reactive read views.
//!
//! ```rust
//! use normcache_core::client::{CacheConfig, Client};
//! use serde_json::json;
//!
//! let client = Client::new(CacheConfig::default());
//! client
//!     .write(&json!({
//!         "__typename": "Person",
//!         "id": "1",
//!         "name": "Chris",
//!         "pets": [{"__typename": "Pet", "id": "p1", "name": "Hitch"}]
//!     }))
//!     .unwrap();
//!
//! let person = client.read("Person:1");
//! assert_eq!(person.get("name").as_str(), Some("Chris"));
//!
//! let pets = person.get("pets");
//! let hitch = pets.as_list().unwrap()[0].as_entity().unwrap();
//! assert_eq!(hitch.key().as_str(), "Pet:p1");
//! ```
//!
//! Clients are explicit values; there is no process-wide default cache.
//! Clones share the same store.

mod config;
mod view;

pub use config::{CacheConfig, CacheOptions};
pub use view::{EntityView, FieldView, ViewValue};

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::ReentrantMutex;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::key::{CacheKey, KeyDeriver};
use crate::merge::{merge, MergeOutcome};
use crate::reactive::Watcher;
use crate::snapshot::Snapshot;
use crate::store::EntityStore;
use crate::traverse::traverse;
use crate::value::FieldValue;

/// A normalized cache and the operations around it.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    store: EntityStore,
    deriver: Arc<dyn KeyDeriver>,
    options: CacheOptions,
    /// Serializes merges. Reentrant so a listener woken by a merge may write.
    write_gate: ReentrantMutex<()>,
}

impl Client {
    pub fn new(config: CacheConfig) -> Self {
        let store = EntityStore::with_adapter(config.adapter(), config.equality().clone());
        Self {
            inner: Arc::new(ClientInner {
                store,
                deriver: config.key_deriver(),
                options: config.options().clone(),
                write_gate: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.inner.store
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// Normalize `payload` and merge it into the store. Returns the
    /// normalized root: a reference when the payload is an entity.
    pub fn write(&self, payload: &Value) -> Result<FieldValue> {
        self.merge(None, payload).map(|outcome| outcome.root)
    }

    /// Write a query response and return a view of it.
    ///
    /// A root object without identity is merged into the root entity
    /// (`ROOT_QUERY` by default), so its fields are cell-backed like any
    /// entity's and later queries merge into them.
    pub fn write_query(&self, payload: &Value) -> Result<ViewValue> {
        let anonymous_root = payload
            .as_object()
            .is_some_and(|object| self.inner.deriver.derive_key(object).is_none());

        let outcome = if anonymous_root {
            let root = CacheKey::new(&self.inner.options.root_key);
            self.merge(Some(&root), payload)?
        } else {
            self.merge(None, payload)?
        };
        Ok(self.view(&outcome.root))
    }

    /// Reactive view of the entity stored under `key`. The entity does not
    /// have to exist yet.
    pub fn read(&self, key: impl Into<CacheKey>) -> EntityView {
        EntityView::new(self.inner.store.clone(), key.into())
    }

    /// View of the root entity that [`write_query`](Self::write_query) fills.
    pub fn read_root(&self) -> EntityView {
        self.read(CacheKey::new(&self.inner.options.root_key))
    }

    /// Denormalize a value returned by [`write`](Self::write) or read from a
    /// field.
    pub fn view(&self, value: &FieldValue) -> ViewValue {
        view::resolve_value(&self.inner.store, value.clone())
    }

    /// Key of an entity-shaped payload object, if it has one.
    pub fn identify(&self, payload: &Value) -> Option<CacheKey> {
        payload
            .as_object()
            .and_then(|object| self.inner.deriver.derive_key(object))
    }

    /// Every entity key in `payload`, in first-seen order, without touching
    /// the store.
    pub fn entity_keys(&self, payload: &Value) -> Vec<CacheKey> {
        let mut keys = IndexSet::new();
        traverse(payload, |step| {
            if let Some(key) = self.identify(step.value) {
                keys.insert(key);
            }
            true
        });
        keys.into_iter().collect()
    }

    /// Run `f` now and again whenever a field it read changes.
    pub fn watch<F>(&self, f: F) -> Watcher
    where
        F: Fn() + Send + Sync + 'static,
    {
        Watcher::new(f)
    }

    /// Copy the store's contents out.
    pub fn extract(&self) -> Snapshot {
        let _gate = self.inner.write_gate.lock();
        Snapshot::capture(&self.inner.store)
    }

    /// Write a snapshot back through the existing cells. Fields the snapshot
    /// does not mention are left alone. Returns the number of cells changed,
    /// or a conflict if a stored field has an incompatible shape.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<usize> {
        let _gate = self.inner.write_gate.lock();
        let changed = snapshot.restore_into(&self.inner.store)?;
        debug!(entities = snapshot.len(), changed, "snapshot restored");
        Ok(changed)
    }

    fn merge(&self, target: Option<&CacheKey>, payload: &Value) -> Result<MergeOutcome> {
        let _gate = self.inner.write_gate.lock();
        merge(&self.inner.store, self.inner.deriver.as_ref(), target, payload)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.inner.options)
            .field("store", &self.inner.store)
            .finish()
    }
}
