//! Normcache Core
//!
//! A normalized entity cache for graph-shaped query results, with
//! field-level reactive invalidation. It implements:
//!
//! - Identity: entities are deduplicated by a derived cache key
//!   (`Type:id` by default)
//! - Normalization: nested payloads are split into flat entity records that
//!   point at each other by key
//! - Merging: partial updates deep-merge into existing records, in place
//! - Reactivity: every field is a signal cell; readers are woken only by the
//!   fields they actually read
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `key`: cache key derivation
//! - `traverse`: generic depth-first walker with a cycle guard
//! - `reactive`: signals, tracking context, subscriptions and watchers
//! - `store`: the entity arena, one cell per `(key, field)`
//! - `merge`: the two-phase normalize-and-merge engine
//! - `client`: the façade, configuration and reactive read views
//! - `snapshot`: copying a store out and back in
//!
//! # Example
//!
//! ```rust
//! use normcache_core::client::Client;
//! use serde_json::json;
//!
//! let client = Client::default();
//! client
//!     .write(&json!({"__typename": "Person", "id": "1", "name": "Chris"}))
//!     .unwrap();
//!
//! let person = client.read("Person:1");
//! let watcher = client.watch({
//!     let person = person.clone();
//!     move || {
//!         let _ = person.get("name");
//!     }
//! });
//!
//! // A field the watcher never read: no re-run.
//! client
//!     .write(&json!({"__typename": "Person", "id": "1", "age": 40}))
//!     .unwrap();
//! assert_eq!(watcher.run_count(), 1);
//!
//! client
//!     .write(&json!({"__typename": "Person", "id": "1", "name": "Kit"}))
//!     .unwrap();
//! assert_eq!(watcher.run_count(), 2);
//! assert_eq!(person.get("name").as_str(), Some("Kit"));
//! ```

pub mod client;
pub mod error;
pub mod key;
pub mod merge;
pub mod reactive;
pub mod snapshot;
pub mod store;
pub mod traverse;
pub mod value;

pub use client::{CacheConfig, CacheOptions, Client, EntityView, FieldView, ViewValue};
pub use error::{CacheError, Result};
pub use key::{CacheKey, KeyDeriver, TypenameId};
pub use snapshot::Snapshot;
pub use store::EntityStore;
pub use value::{FieldSlot, FieldValue, Scalar, Shape};
