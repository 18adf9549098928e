//! Entity Store
//!
//! The canonical arena of entities: [`CacheKey`] → record, where each record
//! maps field names to cells. Entities never own each other; a field that
//! points at another entity holds its key.
//!
//! # Cell identity
//!
//! A `(key, field)` pair gets exactly one cell for the life of the store.
//! Writes go through [`ReactiveCell::set`] on that cell, so subscribers stay
//! attached across merges.
//!
//! # Auto-vivification
//!
//! Asking for a field of an unknown key creates an empty record rather than
//! failing. Merges rely on this to resolve references to entities that have
//! not been seen yet.
//!
//! # Locking
//!
//! The record map sits behind a `parking_lot` lock that is never held while a
//! cell notifies, so listeners may read the store freely.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::key::CacheKey;
use crate::reactive::{
    CellAdapter, CellRef, Equality, Observable, ReactiveCell, Signal, SignalAdapter,
};
use crate::value::{FieldSlot, FieldValue};

struct EntityRecord {
    fields: IndexMap<String, CellRef>,
    /// Bumped whenever a field of this entity first receives a value.
    version: Signal<u64>,
}

impl EntityRecord {
    fn new() -> Self {
        Self {
            fields: IndexMap::new(),
            version: Signal::new(0),
        }
    }
}

struct StoreInner {
    records: RwLock<IndexMap<CacheKey, EntityRecord>>,
    adapter: Arc<dyn CellAdapter>,
    equality: Equality,
}

/// Shared handle to the entity arena. Clones refer to the same store.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<StoreInner>,
}

impl EntityStore {
    /// Store backed by [`Signal`] cells with structural equality.
    pub fn new() -> Self {
        Self::with_adapter(Arc::new(SignalAdapter), Equality::default())
    }

    /// Store whose cells come from `adapter` and compare with `equality`.
    pub fn with_adapter(adapter: Arc<dyn CellAdapter>, equality: Equality) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                records: RwLock::new(IndexMap::new()),
                adapter,
                equality,
            }),
        }
    }

    /// Handle to the entity's field map, creating an empty record on first
    /// access.
    pub fn get_or_create(&self, key: &CacheKey) -> EntityHandle {
        let exists = self.inner.records.read().contains_key(key);
        if !exists {
            self.inner
                .records
                .write()
                .entry(key.clone())
                .or_insert_with(EntityRecord::new);
        }
        EntityHandle {
            store: self.clone(),
            key: key.clone(),
        }
    }

    /// The cell for `field` of `key`, created (holding `None`) on first use.
    pub fn get_field(&self, key: &CacheKey, field: &str) -> CellRef {
        if let Some(cell) = self
            .inner
            .records
            .read()
            .get(key)
            .and_then(|record| record.fields.get(field))
        {
            return Arc::clone(cell);
        }

        let mut records = self.inner.records.write();
        let record = records
            .entry(key.clone())
            .or_insert_with(EntityRecord::new);
        let cell = record
            .fields
            .entry(field.to_string())
            .or_insert_with(|| self.inner.adapter.create(None, &self.inner.equality));
        Arc::clone(cell)
    }

    /// Current value of a field without creating anything.
    pub fn peek(&self, key: &CacheKey, field: &str) -> FieldSlot {
        let cell = self
            .inner
            .records
            .read()
            .get(key)
            .and_then(|record| record.fields.get(field).cloned());
        cell.and_then(|cell| cell.get())
    }

    /// Write `value` into the field's cell. Returns whether the cell changed
    /// (and therefore notified).
    pub fn write_field(&self, key: &CacheKey, field: &str, value: FieldValue) -> bool {
        let cell = self.get_field(key, field);
        let was_undefined = cell.get().is_none();
        let changed = cell.set(Some(value));
        if changed && was_undefined {
            if let Some(version) = self.version(key) {
                version.update(|v| v + 1);
            }
        }
        changed
    }

    /// Whether a record exists for `key`, loaded or not.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.records.read().contains_key(key)
    }

    /// Whether `key` has at least one populated field. Records created only
    /// by lookups are not loaded.
    pub fn is_loaded(&self, key: &CacheKey) -> bool {
        self.inner
            .records
            .read()
            .get(key)
            .is_some_and(|record| record.fields.values().any(|cell| cell.get().is_some()))
    }

    /// All keys, in first-seen order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.records.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    /// Names of the fields that currently hold a value, in first-written
    /// order.
    pub fn field_names(&self, key: &CacheKey) -> Vec<String> {
        self.inner
            .records
            .read()
            .get(key)
            .map(|record| {
                record
                    .fields
                    .iter()
                    .filter(|(_, cell)| cell.get().is_some())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Structural version of an entity as an observable. Readers that
    /// enumerate fields, or wait for a missing entity, track this.
    ///
    /// Creates the record if needed so a reader can wait for an entity that
    /// has not arrived yet.
    pub fn version_observable(&self, key: &CacheKey) -> Arc<dyn Observable> {
        let mut records = self.inner.records.write();
        let record = records
            .entry(key.clone())
            .or_insert_with(EntityRecord::new);
        Arc::new(record.version.clone())
    }

    fn version(&self, key: &CacheKey) -> Option<Signal<u64>> {
        self.inner
            .records
            .read()
            .get(key)
            .map(|record| record.version.clone())
    }

    /// Cells of every field that currently exists for `key`.
    pub(crate) fn cells(&self, key: &CacheKey) -> Vec<(String, CellRef)> {
        self.inner
            .records
            .read()
            .get(key)
            .map(|record| {
                record
                    .fields
                    .iter()
                    .map(|(name, cell)| (name.clone(), Arc::clone(cell)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("entities", &self.len())
            .field("equality", &self.inner.equality)
            .finish()
    }
}

/// Access to one entity's fields.
#[derive(Clone)]
pub struct EntityHandle {
    store: EntityStore,
    key: CacheKey,
}

impl EntityHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The field's cell, created on first use.
    pub fn field(&self, name: &str) -> CellRef {
        self.store.get_field(&self.key, name)
    }

    /// Untracked read of a field.
    pub fn get(&self, name: &str) -> FieldSlot {
        self.store.peek(&self.key, name)
    }

    pub fn set(&self, name: &str, value: FieldValue) -> bool {
        self.store.write_field(&self.key, name, value)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.store.field_names(&self.key)
    }

    /// All populated fields, untracked.
    pub fn fields(&self) -> IndexMap<String, FieldValue> {
        self.store
            .cells(&self.key)
            .into_iter()
            .filter_map(|(name, cell)| cell.get().map(|value| (name, value)))
            .collect()
    }

    pub fn is_loaded(&self) -> bool {
        self.store.is_loaded(&self.key)
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("key", &self.key)
            .field("fields", &self.fields())
            .finish()
    }
}
