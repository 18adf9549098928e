//! Reactive read views.
//!
//! Views are thin handles: an [`EntityView`] is a store plus a key. Every
//! access reads the current cell values, so a view taken before a merge
//! shows the merged data afterwards. Reads made inside a tracking context
//! (a [`Watcher`](crate::reactive::Watcher)) register the cells they touch.
//!
//! References resolve lazily. A reference to an entity that has no data yet
//! reads as [`ViewValue::Missing`]; once the entity arrives the same read
//! resolves, and tracked readers are woken to see it.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::key::CacheKey;
use crate::reactive::{
    CellRef, Listener, Observable, ReactiveCell, ReactiveContext, Subscription,
};
use crate::store::EntityStore;
use crate::traverse::{traverse, CycleKey, PathSegment, Walk};
use crate::value::{reference_marker, FieldSlot, FieldValue, Scalar};

/// A denormalized value.
#[derive(Debug, Clone)]
pub enum ViewValue {
    /// The field was never populated.
    Undefined,
    Scalar(Scalar),
    /// A live view of a referenced entity.
    Entity(EntityView),
    /// A reference to an entity with no data yet.
    Missing(CacheKey),
    List(Vec<ViewValue>),
    Object(IndexMap<String, ViewValue>),
}

impl ViewValue {
    /// Whether reads through this value go to live cells rather than to a
    /// copy.
    pub fn is_reactive_cell(&self) -> bool {
        matches!(self, ViewValue::Entity(_))
    }

    /// Plain JSON, resolving entities fully. Undefined and missing values
    /// become `null`.
    pub fn unwrap(&self) -> Value {
        match self {
            ViewValue::Undefined | ViewValue::Missing(_) => Value::Null,
            ViewValue::Scalar(scalar) => scalar.to_json(),
            ViewValue::Entity(entity) => entity.to_value(),
            ViewValue::List(items) => Value::Array(items.iter().map(ViewValue::unwrap).collect()),
            ViewValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.unwrap()))
                    .collect(),
            ),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, ViewValue::Undefined)
    }

    pub fn as_entity(&self) -> Option<&EntityView> {
        match self {
            ViewValue::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            ViewValue::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ViewValue::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ViewValue]> {
        match self {
            ViewValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Live read view of one entity.
#[derive(Clone)]
pub struct EntityView {
    store: EntityStore,
    key: CacheKey,
}

impl EntityView {
    pub(crate) fn new(store: EntityStore, key: CacheKey) -> Self {
        Self { store, key }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Tracked read of a field, with references resolved to views.
    pub fn get(&self, field: &str) -> ViewValue {
        resolve(&self.store, self.tracked_cell(field).get())
    }

    /// The field itself, for subscribing to it or reading it raw.
    pub fn field(&self, field: &str) -> FieldView {
        FieldView {
            store: self.store.clone(),
            key: self.key.clone(),
            name: field.to_string(),
            cell: self.store.get_field(&self.key, field),
        }
    }

    /// Names of populated fields. Tracked: readers are woken when a field
    /// is added.
    pub fn field_names(&self) -> Vec<String> {
        self.track_version();
        self.store.field_names(&self.key)
    }

    /// Whether any field has data. Tracked like [`field_names`](Self::field_names).
    pub fn is_loaded(&self) -> bool {
        self.track_version();
        self.store.is_loaded(&self.key)
    }

    /// The entity as plain JSON with references resolved recursively.
    ///
    /// A reference back to an entity that is already being rendered higher up
    /// is emitted as `{"__ref": key}`.
    pub fn to_value(&self) -> Value {
        denormalize(GraphNode::entity(&self.store, self.key.clone()))
    }

    /// Call `listener` whenever any field of this entity changes or a new
    /// field appears.
    ///
    /// Fields added later are picked up when the entity's version moves, so
    /// their later changes are reported too. One merge calls `listener` once.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut targets: Vec<Arc<dyn Observable>> = self
            .store
            .cells(&self.key)
            .into_iter()
            .map(|(_, cell)| cell.into_observable())
            .collect();
        targets.push(self.store.version_observable(&self.key));

        let store = self.store.clone();
        let key = self.key.clone();
        Subscription::attach_with(targets, move |subscription| {
            Arc::new(move || {
                for (_, cell) in store.cells(&key) {
                    subscription.add(cell.into_observable());
                }
                listener();
            })
        })
    }

    fn tracked_cell(&self, field: &str) -> CellRef {
        let cell = self.store.get_field(&self.key, field);
        ReactiveContext::track(Arc::clone(&cell).into_observable());
        cell
    }

    fn track_version(&self) {
        if ReactiveContext::is_active() {
            ReactiveContext::track(self.store.version_observable(&self.key));
        }
    }
}

impl fmt::Debug for EntityView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityView").field(&self.key).finish()
    }
}

/// One field of one entity.
#[derive(Clone)]
pub struct FieldView {
    store: EntityStore,
    key: CacheKey,
    name: String,
    cell: CellRef,
}

impl FieldView {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tracked raw read: references stay keys.
    pub fn get(&self) -> FieldSlot {
        ReactiveContext::track(Arc::clone(&self.cell).into_observable());
        self.cell.get()
    }

    /// Tracked read with references resolved.
    pub fn value(&self) -> ViewValue {
        resolve(&self.store, self.get())
    }

    /// Call `listener` whenever this field changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        Subscription::attach(vec![Arc::clone(&self.cell).into_observable()], listener)
    }
}

impl fmt::Debug for FieldView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldView")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("value", &self.cell.get())
            .finish()
    }
}

pub(crate) fn resolve(store: &EntityStore, slot: FieldSlot) -> ViewValue {
    match slot {
        None => ViewValue::Undefined,
        Some(value) => resolve_value(store, value),
    }
}

pub(crate) fn resolve_value(store: &EntityStore, value: FieldValue) -> ViewValue {
    match value {
        FieldValue::Scalar(scalar) => ViewValue::Scalar(scalar),
        FieldValue::Reference(key) => {
            if store.is_loaded(&key) {
                ViewValue::Entity(EntityView::new(store.clone(), key))
            } else {
                missing(store, &key);
                ViewValue::Missing(key)
            }
        }
        FieldValue::List(items) => ViewValue::List(
            items
                .into_iter()
                .map(|item| resolve_value(store, item))
                .collect(),
        ),
        FieldValue::Object(fields) => ViewValue::Object(
            fields
                .into_iter()
                .map(|(name, value)| (name, resolve_value(store, value)))
                .collect(),
        ),
    }
}

/// Report an unresolvable reference, and let a tracking reader wait for it.
fn missing(store: &EntityStore, key: &CacheKey) {
    warn!(entity = %key, "reference to an entity with no data");
    if ReactiveContext::is_active() {
        ReactiveContext::track(store.version_observable(key));
    }
}

/// The entity graph as seen from the store, for denormalization.
#[derive(Clone)]
struct GraphNode<'s> {
    store: &'s EntityStore,
    kind: NodeKind,
}

#[derive(Clone)]
enum NodeKind {
    Entity(CacheKey),
    Missing(CacheKey),
    Value(FieldValue),
}

impl<'s> GraphNode<'s> {
    fn entity(store: &'s EntityStore, key: CacheKey) -> Self {
        let kind = if store.is_loaded(&key) {
            NodeKind::Entity(key)
        } else {
            missing(store, &key);
            NodeKind::Missing(key)
        };
        Self { store, kind }
    }

    fn value(store: &'s EntityStore, value: FieldValue) -> Self {
        match value {
            FieldValue::Reference(key) => Self::entity(store, key),
            other => Self {
                store,
                kind: NodeKind::Value(other),
            },
        }
    }

    /// The node rendered without its children.
    fn shell(&self) -> Value {
        match &self.kind {
            NodeKind::Entity(_) => Value::Object(Default::default()),
            NodeKind::Missing(_) => Value::Null,
            NodeKind::Value(FieldValue::List(_)) => Value::Array(Vec::new()),
            NodeKind::Value(FieldValue::Object(_)) => Value::Object(Default::default()),
            NodeKind::Value(value) => value.to_json(),
        }
    }
}

impl Walk for GraphNode<'_> {
    /// Entity children are read through their cells, tracked.
    fn children(&self) -> Option<Vec<(PathSegment, Self)>> {
        match &self.kind {
            NodeKind::Entity(key) => {
                if ReactiveContext::is_active() {
                    ReactiveContext::track(self.store.version_observable(key));
                }
                let children = self
                    .store
                    .cells(key)
                    .into_iter()
                    .filter_map(|(name, cell)| {
                        ReactiveContext::track(Arc::clone(&cell).into_observable());
                        let value = cell.get()?;
                        Some((PathSegment::Field(name), GraphNode::value(self.store, value)))
                    })
                    .collect();
                Some(children)
            }
            NodeKind::Value(FieldValue::List(items)) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        (PathSegment::Index(index), GraphNode::value(self.store, item.clone()))
                    })
                    .collect(),
            ),
            NodeKind::Value(FieldValue::Object(fields)) => Some(
                fields
                    .iter()
                    .map(|(name, value)| {
                        (
                            PathSegment::Field(name.clone()),
                            GraphNode::value(self.store, value.clone()),
                        )
                    })
                    .collect(),
            ),
            NodeKind::Value(_) | NodeKind::Missing(_) => None,
        }
    }

    fn cycle_key(&self) -> Option<CycleKey> {
        match &self.kind {
            NodeKind::Entity(key) => Some(CycleKey::Entity(key.clone())),
            _ => None,
        }
    }
}

fn denormalize(root: GraphNode<'_>) -> Value {
    let mut out = Value::Null;
    traverse(root, |step| {
        let rendered = match (&step.value.kind, step.revisit) {
            (NodeKind::Entity(key), true) => reference_marker(key),
            _ => step.value.shell(),
        };
        place(&mut out, step.path, rendered);
        true
    });
    out
}

/// Put `value` at `path` inside `out`. Parents are always placed before
/// their children, and siblings in order.
fn place(out: &mut Value, path: &[PathSegment], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *out = value;
        return;
    };

    let mut slot = out;
    for segment in parents {
        let next = match segment {
            PathSegment::Field(name) => slot.get_mut(name.as_str()),
            PathSegment::Index(index) => slot.get_mut(*index),
        };
        slot = match next {
            Some(next) => next,
            None => return,
        };
    }

    match (last, slot) {
        (PathSegment::Field(name), Value::Object(fields)) => {
            fields.insert(name.clone(), value);
        }
        (PathSegment::Index(_), Value::Array(items)) => items.push(value),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TypenameId;
    use crate::merge::merge;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store_with(payloads: &[Value]) -> EntityStore {
        let store = EntityStore::new();
        for payload in payloads {
            merge(&store, &TypenameId::default(), None, payload).unwrap();
        }
        store
    }

    fn view(store: &EntityStore, key: &str) -> EntityView {
        EntityView::new(store.clone(), CacheKey::from(key))
    }

    #[test]
    fn get_resolves_references() {
        let store = store_with(&[json!({
            "__typename": "Person",
            "id": "1",
            "pets": [{"__typename": "Pet", "id": "p1", "name": "Hitch"}]
        })]);

        let pets = view(&store, "Person:1").get("pets");
        let pets = pets.as_list().unwrap();
        assert_eq!(pets.len(), 1);
        assert!(pets[0].is_reactive_cell());
        assert_eq!(pets[0].as_entity().unwrap().get("name").as_str(), Some("Hitch"));
    }

    #[test]
    fn views_read_current_values() {
        let store = store_with(&[json!({"__typename": "Person", "id": "1", "name": "Chris"})]);
        let person = view(&store, "Person:1");

        merge(
            &store,
            &TypenameId::default(),
            None,
            &json!({"__typename": "Person", "id": "1", "name": "Kit"}),
        )
        .unwrap();
        assert_eq!(person.get("name").as_str(), Some("Kit"));
    }

    #[test]
    fn unread_field_is_undefined() {
        let store = store_with(&[json!({"__typename": "Person", "id": "1"})]);
        assert!(view(&store, "Person:1").get("nickname").is_undefined());
        assert!(view(&store, "Person:1").field("nickname").get().is_none());
    }

    #[test]
    fn dangling_reference_is_missing() {
        let store = store_with(&[json!({"__typename": "Person", "id": "1"})]);
        store.write_field(
            &CacheKey::from("Person:1"),
            "best",
            FieldValue::reference("Person:2"),
        );

        let best = view(&store, "Person:1").get("best");
        assert!(matches!(best, ViewValue::Missing(ref key) if key.as_str() == "Person:2"));
        assert!(!best.is_reactive_cell());
        assert_eq!(best.unwrap(), Value::Null);
    }

    #[test]
    fn to_value_resolves_and_stops_at_cycles() {
        let store = store_with(&[json!({
            "__typename": "Person",
            "id": "1",
            "name": "Ann",
            "friend": {
                "__typename": "Person",
                "id": "2",
                "name": "Bo",
                "friend": {"__typename": "Person", "id": "1"}
            }
        })]);

        assert_eq!(
            view(&store, "Person:1").to_value(),
            json!({
                "__typename": "Person",
                "id": "1",
                "name": "Ann",
                "friend": {
                    "__typename": "Person",
                    "id": "2",
                    "name": "Bo",
                    "friend": {"__ref": "Person:1"}
                }
            })
        );
    }

    #[test]
    fn to_value_keeps_lists_and_anonymous_objects() {
        let store = store_with(&[json!({
            "__typename": "Feed",
            "id": "f",
            "items": [{"title": "a", "by": {"__typename": "User", "id": "u", "name": "U"}}, "b"],
            "meta": {"total": 2}
        })]);

        assert_eq!(
            view(&store, "Feed:f").to_value(),
            json!({
                "__typename": "Feed",
                "id": "f",
                "items": [
                    {"title": "a", "by": {"__typename": "User", "id": "u", "name": "U"}},
                    "b"
                ],
                "meta": {"total": 2}
            })
        );
    }

    #[test]
    fn to_value_of_unknown_entity_is_null() {
        let store = EntityStore::new();
        assert_eq!(view(&store, "Nope:1").to_value(), Value::Null);
    }

    #[test]
    fn field_subscription_fires_only_for_its_field() {
        let store = store_with(&[json!({"__typename": "Person", "id": "1", "name": "A", "age": 1})]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let subscription = view(&store, "Person:1").field("name").subscribe(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        merge(
            &store,
            &TypenameId::default(),
            None,
            &json!({"__typename": "Person", "id": "1", "age": 2}),
        )
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        merge(
            &store,
            &TypenameId::default(),
            None,
            &json!({"__typename": "Person", "id": "1", "name": "B"}),
        )
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(subscription);
        merge(
            &store,
            &TypenameId::default(),
            None,
            &json!({"__typename": "Person", "id": "1", "name": "C"}),
        )
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn entity_subscription_follows_new_fields() {
        let store = store_with(&[json!({"__typename": "Person", "id": "1", "name": "A"})]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let subscription = view(&store, "Person:1").subscribe(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(subscription.target_count(), 4);

        let write = |payload: Value| {
            merge(&store, &TypenameId::default(), None, &payload).unwrap();
            calls.load(Ordering::SeqCst)
        };

        // New field, then a change to it.
        assert_eq!(write(json!({"__typename": "Person", "id": "1", "email": "a@x"})), 1);
        assert_eq!(write(json!({"__typename": "Person", "id": "1", "email": "b@x"})), 2);
        assert_eq!(write(json!({"__typename": "Person", "id": "1", "name": "B"})), 3);

        // A change and a new field in one merge.
        assert_eq!(
            write(json!({"__typename": "Person", "id": "1", "name": "C", "phone": "1"})),
            4
        );
        assert_eq!(write(json!({"__typename": "Person", "id": "1", "phone": "2"})), 5);
        assert_eq!(subscription.target_count(), 6);

        drop(subscription);
        assert_eq!(write(json!({"__typename": "Person", "id": "1", "phone": "3"})), 5);
    }

    #[test]
    fn entity_subscription_sees_a_merge_once() {
        let store = store_with(&[json!({"__typename": "Person", "id": "1", "name": "A"})]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let _subscription = view(&store, "Person:1").subscribe(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Same entity twice in one payload: both copies land in one commit.
        merge(
            &store,
            &TypenameId::default(),
            None,
            &json!({
                "__typename": "Person",
                "id": "1",
                "name": "B",
                "friend": {"__typename": "Person", "id": "1", "age": 3}
            }),
        )
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn place_builds_nested_values() {
        let mut out = Value::Null;
        place(&mut out, &[], json!({}));
        place(&mut out, &[PathSegment::Field("a".into())], json!([]));
        place(
            &mut out,
            &[PathSegment::Field("a".into()), PathSegment::Index(0)],
            json!(1),
        );
        place(
            &mut out,
            &[PathSegment::Field("a".into()), PathSegment::Index(1)],
            json!(2),
        );
        assert_eq!(out, json!({"a": [1, 2]}));
    }
}
