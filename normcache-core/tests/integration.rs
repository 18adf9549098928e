//! Integration Tests for the Normalized Cache
//!
//! These tests drive the client end to end: writes, reads, watchers and
//! snapshots working together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use normcache_core::client::{CacheConfig, Client, ViewValue};
use normcache_core::merge::merge_deep;
use normcache_core::reactive::{Observable, ReactiveCell, ReactiveContext, Signal, SubscriberId};
use normcache_core::{CacheError, CacheKey, FieldValue, Snapshot};
use serde_json::json;

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    (count, move || {
        count_clone.fetch_add(1, Ordering::SeqCst);
    })
}

/// Test the person/pets scenario: two partial payloads for one person.
#[test]
fn partial_payloads_merge_into_one_person() {
    let client = Client::default();

    client
        .write(&json!({"__typename": "Person", "id": "1", "name": "Chris"}))
        .unwrap();
    client
        .write(&json!({
            "__typename": "Person",
            "id": "1",
            "pets": [{"__typename": "Pet", "id": "p1", "name": "Hitch"}]
        }))
        .unwrap();

    let person = client.read("Person:1");
    assert_eq!(person.get("name").as_str(), Some("Chris"));

    let pets = person.get("pets");
    let pets = pets.as_list().unwrap();
    assert_eq!(pets.len(), 1);
    let pet = pets[0].as_entity().unwrap();
    assert_eq!(pet.key().as_str(), "Pet:p1");
    assert_eq!(pet.get("name").as_str(), Some("Hitch"));

    assert_eq!(client.store().len(), 2);
}

/// Test that two queries reaching the same entity share one record.
#[test]
fn entities_are_deduplicated_across_queries() {
    let client = Client::default();

    client
        .write_query(&json!({"me": {"__typename": "User", "id": "u1", "name": "Ann"}}))
        .unwrap();
    client
        .write_query(&json!({
            "post": {
                "__typename": "Post",
                "id": "x",
                "author": {"__typename": "User", "id": "u1", "name": "Ann B."}
            }
        }))
        .unwrap();

    let me = client.read_root().get("me");
    assert_eq!(me.as_entity().unwrap().get("name").as_str(), Some("Ann B."));

    let users = client
        .store()
        .keys()
        .into_iter()
        .filter(|key| key.typename() == Some("User"))
        .count();
    assert_eq!(users, 1);
}

/// Test that field cells survive merges.
#[test]
fn field_cells_keep_their_identity() {
    let client = Client::default();
    client
        .write(&json!({"__typename": "Person", "id": "1", "name": "Chris"}))
        .unwrap();
    let key = CacheKey::from("Person:1");
    let before = client.store().get_field(&key, "name");

    client
        .write(&json!({"__typename": "Person", "id": "1", "name": "Kit", "age": 3}))
        .unwrap();
    let after = client.store().get_field(&key, "name");

    assert_eq!(before.observable_id(), after.observable_id());
    assert_eq!(before.get(), Some(FieldValue::string("Kit")));
}

/// Test that absent keys keep stored data and explicit nulls replace it.
#[test]
fn absent_keys_preserve_and_null_overwrites() {
    let client = Client::default();
    client
        .write(&json!({"__typename": "Person", "id": "1", "name": "X"}))
        .unwrap();

    client
        .write(&json!({"__typename": "Person", "id": "1"}))
        .unwrap();
    assert_eq!(client.read("Person:1").get("name").as_str(), Some("X"));

    client
        .write(&json!({"__typename": "Person", "id": "1", "name": null}))
        .unwrap();
    assert_eq!(client.read("Person:1").get("name").unwrap(), json!(null));
}

/// Test that a shorter incoming list replaces a longer stored one.
#[test]
fn incoming_list_replaces_stored_list() {
    let client = Client::default();
    client
        .write(&json!({"__typename": "Feed", "id": "f", "items": ["a", "b", "c"]}))
        .unwrap();
    client
        .write(&json!({"__typename": "Feed", "id": "f", "items": ["a2", "b2"]}))
        .unwrap();

    assert_eq!(
        client.read("Feed:f").get("items").unwrap(),
        json!(["a2", "b2"])
    );
}

/// Test that re-writing identical data notifies nobody.
#[test]
fn identical_write_notifies_nobody() {
    let client = Client::default();
    let payload = json!({
        "__typename": "Person",
        "id": "1",
        "name": "Chris",
        "pets": [{"__typename": "Pet", "id": "p1", "name": "Hitch"}],
        "meta": {"tags": ["a", "b"]}
    });
    client.write(&payload).unwrap();

    let (person_calls, on_person) = counter();
    let (pet_calls, on_pet) = counter();
    let _person = client.read("Person:1").subscribe(on_person);
    let _pet = client.read("Pet:p1").subscribe(on_pet);

    client.write(&payload).unwrap();
    assert_eq!(person_calls.load(Ordering::SeqCst), 0);
    assert_eq!(pet_calls.load(Ordering::SeqCst), 0);
}

/// Test that watchers re-run only for fields they read.
#[test]
fn watcher_wakes_only_for_fields_read() {
    let client = Client::default();
    client
        .write(&json!({
            "__typename": "Person",
            "id": "1",
            "name": "Chris",
            "age": 40,
            "pets": [{"__typename": "Pet", "id": "p1", "name": "Hitch"}]
        }))
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let person = client.read("Person:1");
    let seen_clone = seen.clone();
    let watcher = client.watch(move || {
        let pets = person.get("pets");
        let names: Vec<String> = pets
            .as_list()
            .unwrap_or_default()
            .iter()
            .filter_map(|pet| pet.as_entity())
            .filter_map(|pet| pet.get("name").as_str().map(str::to_string))
            .collect();
        seen_clone.lock().unwrap().push(names);
    });
    assert_eq!(watcher.run_count(), 1);

    // Not read by the watcher.
    client
        .write(&json!({"__typename": "Person", "id": "1", "age": 41}))
        .unwrap();
    client
        .write(&json!({"__typename": "Pet", "id": "p1", "species": "dog"}))
        .unwrap();
    assert_eq!(watcher.run_count(), 1);

    // Read through the reference.
    client
        .write(&json!({"__typename": "Pet", "id": "p1", "name": "Hitchcock"}))
        .unwrap();
    assert_eq!(watcher.run_count(), 2);
    assert_eq!(
        seen.lock().unwrap().last().cloned(),
        Some(vec!["Hitchcock".to_string()])
    );
}

/// Test that a rejected merge leaves every field untouched.
#[test]
fn conflicting_write_changes_nothing() {
    let client = Client::default();
    client
        .write(&json!({
            "__typename": "Person",
            "id": "1",
            "name": "Chris",
            "pets": [{"__typename": "Pet", "id": "p1", "name": "Hitch"}]
        }))
        .unwrap();
    let before = client.extract();

    let (calls, on_change) = counter();
    let _subscription = client.read("Person:1").subscribe(on_change);

    let err = client
        .write(&json!({
            "__typename": "Person",
            "id": "1",
            "name": "Kit",
            "pets": {"__typename": "Pet", "id": "p1"}
        }))
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "identity conflict at Person:1.pets: stored list, incoming object"
    );
    assert!(matches!(err, CacheError::IdentityConflict { .. }));
    assert_eq!(client.extract(), before);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test that a dangling reference reads as missing, then resolves.
#[test]
fn missing_reference_resolves_when_entity_arrives() {
    let client = Client::default();
    client
        .write(&json!({"__typename": "Person", "id": "1", "name": "Ann"}))
        .unwrap();
    client.store().write_field(
        &CacheKey::from("Person:1"),
        "best",
        FieldValue::reference("Person:2"),
    );

    let resolved = Arc::new(Mutex::new(None));
    let person = client.read("Person:1");
    let resolved_clone = resolved.clone();
    let watcher = client.watch(move || {
        let best = match person.get("best") {
            ViewValue::Entity(best) => best.get("name").as_str().map(str::to_string),
            _ => None,
        };
        *resolved_clone.lock().unwrap() = best;
    });
    assert_eq!(*resolved.lock().unwrap(), None);
    assert!(matches!(
        client.read("Person:1").get("best"),
        ViewValue::Missing(_)
    ));

    client
        .write(&json!({"__typename": "Person", "id": "2", "name": "Bo"}))
        .unwrap();
    assert!(watcher.run_count() >= 2);
    assert_eq!(*resolved.lock().unwrap(), Some("Bo".to_string()));
}

/// Test that a snapshot restores into a fresh client and keeps views live.
#[test]
fn snapshot_restores_through_live_views() {
    let source = Client::default();
    source
        .write(&json!({
            "__typename": "Person",
            "id": "1",
            "name": "Chris",
            "pets": [{"__typename": "Pet", "id": "p1", "name": "Hitch"}]
        }))
        .unwrap();
    let bytes = source.extract().to_msgpack().unwrap();

    let target = Client::new(CacheConfig::default());
    let person = target.read("Person:1");
    let (calls, on_change) = counter();
    let _subscription = person.field("name").subscribe(on_change);

    let changed = target
        .restore(&Snapshot::from_msgpack(&bytes).unwrap())
        .unwrap();
    assert!(changed > 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(person.to_value(), source.read("Person:1").to_value());
}

/// Test the plain deep merge helper.
#[test]
fn merge_deep_fills_undefined_target() {
    assert_eq!(
        merge_deep(&json!({}), &json!({"page": ["x"]})),
        json!({"page": ["x"]})
    );
}

/// Test that ReactiveContext correctly tracks nested computations.
#[test]
fn nested_reactive_contexts() {
    let (a, b, c) = (Signal::new(1), Signal::new(2), Signal::new(3));

    let _outer_ctx = ReactiveContext::enter(SubscriberId::new());
    ReactiveContext::track(Arc::new(a.clone()));
    ReactiveContext::track(Arc::new(b.clone()));

    {
        let _inner_ctx = ReactiveContext::enter(SubscriberId::new());
        ReactiveContext::track(Arc::new(c.clone()));

        // Inner context should see its own dependencies
        assert_eq!(ReactiveContext::get_dependencies(), vec![c.id()]);
    }

    // Back to outer context, should see outer dependencies only
    assert_eq!(ReactiveContext::get_dependencies(), vec![a.id(), b.id()]);
}
