//! Merge Engine
//!
//! Reconciles an incoming payload with the entity store.
//!
//! # Algorithm
//!
//! - Scalars are stored as-is. Under an entity they end up in that field's
//!   cell; nested in anonymous structure they are returned to the caller.
//! - Lists merge element-wise by position. The incoming list decides the
//!   length: trailing stored elements are dropped.
//! - Objects with a derivable key are merged field by field into that entity
//!   and replaced by a [`FieldValue::Reference`]. Objects without one are
//!   merged by field name into a copy of the stored object, so keys the
//!   payload omits keep their stored values.
//! - A key missing from the payload means "not requested", never "cleared".
//!   An explicit `null` does overwrite.
//!
//! # Phases
//!
//! Discovery walks the payload with [`traverse`] and derives a key for
//! every object that has one. Planning normalizes the whole payload against the
//! store as it was before the merge (and against the merge's own pending
//! writes when an entity appears twice), looks identities up from
//! discovery, and rejects shape conflicts. Only a
//! conflict-free plan is committed, cell by cell, in first-seen order, inside
//! a notification batch: listeners run after the last cell is written and
//! never see a merge half-applied. A failed merge writes nothing.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::error::{CacheError, Result};
use crate::key::{CacheKey, KeyDeriver};
use crate::reactive::batch;
use crate::store::EntityStore;
use crate::traverse::{display_path, traverse, Path, PathSegment};
use crate::value::{FieldValue, Scalar, Shape};

/// Summary of a committed merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The normalized payload: a reference for identity-bearing roots, the
    /// structurally merged value otherwise.
    pub root: FieldValue,
    /// Entities written, in first-seen order.
    pub entities: Vec<CacheKey>,
    /// Field writes planned.
    pub planned: usize,
    /// Field writes that changed a cell (and notified its subscribers).
    pub changed: usize,
}

/// Merge `incoming` into `store`.
///
/// With `target` set, `incoming` must be an object and its fields are merged
/// into that entity whether or not the object carries identity fields of its
/// own. This is how anonymous query roots are stored. Without a target the
/// payload is normalized on its own.
pub fn merge(
    store: &EntityStore,
    deriver: &dyn KeyDeriver,
    target: Option<&CacheKey>,
    incoming: &Value,
) -> Result<MergeOutcome> {
    let mut planner = Planner {
        store,
        identities: discover(deriver, incoming),
        writes: IndexMap::new(),
    };

    let root = match (target, incoming) {
        (Some(key), Value::Object(fields)) => {
            planner.merge_entity(key, fields)?;
            FieldValue::Reference(key.clone())
        }
        (Some(key), other) => {
            let err = CacheError::IdentityConflict {
                key: Some(key.clone()),
                path: String::new(),
                stored: Shape::Object,
                incoming: Shape::of_json(other),
            };
            warn!(error = %err, "merge rejected");
            return Err(err);
        }
        (None, incoming) => planner.normalize(None, &mut Path::new(), incoming, None)?,
    };

    Ok(planner.commit(root))
}

/// Structural deep merge of plain JSON values.
///
/// Objects merge by key; keys missing from `source` keep the value from
/// `target`. Anything else in `source`, `null` and arrays included, replaces
/// what `target` had.
///
/// ```rust
/// use normcache_core::merge::merge_deep;
/// use serde_json::json;
///
/// // `page` is undefined in the target: the source fills it in.
/// assert_eq!(
///     merge_deep(&json!({}), &json!({"page": ["x"]})),
///     json!({"page": ["x"]}),
/// );
/// ```
pub fn merge_deep(target: &Value, source: &Value) -> Value {
    match (target, source) {
        (Value::Object(target_fields), Value::Object(source_fields)) => {
            let mut merged = target_fields.clone();
            for (name, value) in source_fields {
                let next = match target_fields.get(name) {
                    Some(existing) => merge_deep(existing, value),
                    None => value.clone(),
                };
                merged.insert(name.clone(), next);
            }
            Value::Object(merged)
        }
        (_, source) => source.clone(),
    }
}

/// Payload objects that carry an identity, by address.
type Identities = HashMap<usize, CacheKey>;

fn address(value: &Value) -> usize {
    value as *const Value as usize
}

/// Derive a key for every identity-bearing object in `incoming`.
fn discover(deriver: &dyn KeyDeriver, incoming: &Value) -> Identities {
    let mut identities = Identities::new();
    traverse(incoming, |step| {
        if let Value::Object(fields) = *step.value {
            if let Some(key) = deriver.derive_key(fields) {
                identities.insert(address(step.value), key);
            }
        }
        true
    });
    trace!(identities = identities.len(), "payload identities discovered");
    identities
}

struct Planner<'a> {
    store: &'a EntityStore,
    identities: Identities,
    /// Pending writes per entity, entities and fields in first-seen order.
    writes: IndexMap<CacheKey, IndexMap<String, FieldValue>>,
}

impl Planner<'_> {
    fn merge_entity(&mut self, key: &CacheKey, fields: &Map<String, Value>) -> Result<()> {
        self.writes.entry(key.clone()).or_default();

        let mut path = Path::new();
        for (field, value) in fields {
            let stored = self.current(key, field);
            path.push(PathSegment::Field(field.clone()));
            let merged = self.normalize_slot(Some(key), &mut path, value, stored.as_ref())?;
            path.pop();

            trace!(entity = %key, field = field.as_str(), "planned field write");
            self.writes
                .entry(key.clone())
                .or_default()
                .insert(field.clone(), merged);
        }
        Ok(())
    }

    /// The value a field has as far as this merge is concerned.
    fn current(&self, key: &CacheKey, field: &str) -> Option<FieldValue> {
        self.writes
            .get(key)
            .and_then(|fields| fields.get(field))
            .cloned()
            .or_else(|| self.store.peek(key, field))
    }

    /// Normalize into a named slot, rejecting shape conflicts with what the
    /// slot holds.
    fn normalize_slot(
        &mut self,
        owner: Option<&CacheKey>,
        path: &mut Path,
        incoming: &Value,
        stored: Option<&FieldValue>,
    ) -> Result<FieldValue> {
        if let Some(stored) = stored {
            let incoming_shape = Shape::of_json(incoming);
            if !stored.shape().compatible_with(incoming_shape) {
                let err = CacheError::IdentityConflict {
                    key: owner.cloned(),
                    path: display_path(path),
                    stored: stored.shape(),
                    incoming: incoming_shape,
                };
                warn!(error = %err, "merge rejected");
                return Err(err);
            }
        }
        self.normalize(owner, path, incoming, stored)
    }

    fn normalize(
        &mut self,
        owner: Option<&CacheKey>,
        path: &mut Path,
        incoming: &Value,
        stored: Option<&FieldValue>,
    ) -> Result<FieldValue> {
        match incoming {
            Value::Null => Ok(FieldValue::Scalar(Scalar::Null)),
            Value::Bool(b) => Ok(FieldValue::Scalar(Scalar::Bool(*b))),
            Value::Number(n) => Ok(FieldValue::Scalar(Scalar::Number(n.clone()))),
            Value::String(s) => Ok(FieldValue::Scalar(Scalar::String(s.clone()))),
            Value::Array(items) => {
                let stored_items: &[FieldValue] = match stored {
                    Some(FieldValue::List(items)) => items,
                    _ => &[],
                };

                let mut merged = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    // An element of a different shape is replaced, not merged.
                    let stored_item = stored_items
                        .get(index)
                        .filter(|s| s.shape().compatible_with(Shape::of_json(item)));
                    path.push(PathSegment::Index(index));
                    merged.push(self.normalize(owner, path, item, stored_item)?);
                    path.pop();
                }
                Ok(FieldValue::List(merged))
            }
            Value::Object(fields) => match self.identities.get(&address(incoming)).cloned() {
                Some(key) => {
                    self.merge_entity(&key, fields)?;
                    Ok(FieldValue::Reference(key))
                }
                None => {
                    let mut merged = match stored {
                        Some(FieldValue::Object(existing)) => existing.clone(),
                        _ => IndexMap::new(),
                    };
                    for (name, value) in fields {
                        let stored_field = merged.get(name).cloned();
                        path.push(PathSegment::Field(name.clone()));
                        let next = self.normalize_slot(owner, path, value, stored_field.as_ref())?;
                        path.pop();
                        merged.insert(name.clone(), next);
                    }
                    Ok(FieldValue::Object(merged))
                }
            },
        }
    }

    /// Write the plan. Listeners run once every cell has been written.
    fn commit(self, root: FieldValue) -> MergeOutcome {
        let mut planned = 0;
        let mut changed = 0;
        let mut entities = Vec::with_capacity(self.writes.len());

        let store = self.store;
        batch(|| {
            for (key, fields) in self.writes {
                store.get_or_create(&key);
                for (field, value) in fields {
                    planned += 1;
                    if store.write_field(&key, &field, value) {
                        changed += 1;
                    }
                }
                entities.push(key);
            }
        });

        debug!(entities = entities.len(), planned, changed, "merge committed");
        MergeOutcome {
            root,
            entities,
            planned,
            changed,
        }
    }
}
