//! Store snapshots.
//!
//! A [`Snapshot`] is a plain copy of every populated field in a store, for
//! persisting a cache between sessions or seeding one from a server render.
//! It encodes as JSON or MessagePack.
//!
//! Restoring writes through the store's existing cells, so views and watchers
//! attached before the restore keep working and are notified of what changed.
//! Like a merge, a restore is checked for shape conflicts before anything is
//! written, and listeners run once the whole snapshot is in.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::reactive::batch;
use crate::store::EntityStore;
use crate::value::FieldValue;

/// Entity key → populated fields, in store order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entities: IndexMap<CacheKey, IndexMap<String, FieldValue>>,
}

impl Snapshot {
    /// Copy every loaded entity out of `store`. Records that only exist
    /// because something looked them up are skipped.
    pub fn capture(store: &EntityStore) -> Self {
        let entities = store
            .keys()
            .into_iter()
            .filter_map(|key| {
                let fields = store.get_or_create(&key).fields();
                (!fields.is_empty()).then_some((key, fields))
            })
            .collect();
        Self { entities }
    }

    /// Write every field into `store`. Returns the number of cells changed.
    ///
    /// A field whose stored shape conflicts with the snapshot's fails the
    /// restore before any cell is written.
    pub fn restore_into(&self, store: &EntityStore) -> Result<usize> {
        for (key, fields) in &self.entities {
            for (field, value) in fields {
                let Some(stored) = store.peek(key, field) else {
                    continue;
                };
                if !stored.shape().compatible_with(value.shape()) {
                    let err = CacheError::IdentityConflict {
                        key: Some(key.clone()),
                        path: field.clone(),
                        stored: stored.shape(),
                        incoming: value.shape(),
                    };
                    warn!(error = %err, "restore rejected");
                    return Err(err);
                }
            }
        }

        let mut changed = 0;
        batch(|| {
            for (key, fields) in &self.entities {
                for (field, value) in fields {
                    if store.write_field(key, field, value.clone()) {
                        changed += 1;
                    }
                }
            }
        });
        Ok(changed)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Snapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CacheError::Snapshot(e.to_string()))
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| CacheError::Snapshot(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::Snapshot(e.to_string()))
    }
}
