//! Cache Keys
//!
//! A [`CacheKey`] is the stable identity of an entity. Two payload objects
//! that derive the same key are the same entity, whatever query they came
//! from.
//!
//! Key derivation is pluggable through [`KeyDeriver`]. The default,
//! [`TypenameId`], joins the type discriminator with the id fields:
//! `{"__typename": "Person", "id": "1"}` becomes `Person:1`.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable string identity of an entity.
///
/// Cheap to clone; the string is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Create a key from any string.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The type part of a `Type:id` key, if the key has that form.
    pub fn typename(&self) -> Option<&str> {
        self.0.split_once(':').map(|(typename, _)| typename)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Maps an entity-shaped object to its identity.
///
/// Implementations must be pure: the same object always yields the same key,
/// and `None` means the object has no identity and is merged by position.
///
/// Any `Fn(&Map<String, Value>) -> Option<CacheKey>` closure is a deriver.
pub trait KeyDeriver: Send + Sync {
    /// Derive the key for `object`, or `None` if it has no identity.
    fn derive_key(&self, object: &Map<String, Value>) -> Option<CacheKey>;
}

impl<F> KeyDeriver for F
where
    F: Fn(&Map<String, Value>) -> Option<CacheKey> + Send + Sync,
{
    fn derive_key(&self, object: &Map<String, Value>) -> Option<CacheKey> {
        self(object)
    }
}

/// Default deriver: `Type:id`, or `Type:id1:id2` for composite ids.
///
/// Every id field must be present and be a string or a number; otherwise the
/// object has no identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypenameId {
    typename_field: String,
    id_fields: Vec<String>,
}

impl TypenameId {
    /// Deriver reading `typename_field` and the given id fields, in order.
    pub fn new<I, S>(typename_field: impl Into<String>, id_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            typename_field: typename_field.into(),
            id_fields: id_fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Name of the type discriminator field.
    pub fn typename_field(&self) -> &str {
        &self.typename_field
    }
}

impl Default for TypenameId {
    fn default() -> Self {
        Self::new("__typename", ["id"])
    }
}

impl KeyDeriver for TypenameId {
    fn derive_key(&self, object: &Map<String, Value>) -> Option<CacheKey> {
        let typename = object.get(&self.typename_field)?.as_str()?;
        if self.id_fields.is_empty() {
            return None;
        }

        let mut key = String::from(typename);
        for field in &self.id_fields {
            key.push(':');
            match object.get(field)? {
                Value::String(id) => key.push_str(id),
                Value::Number(id) => key.push_str(&id.to_string()),
                _ => return None,
            }
        }
        Some(CacheKey::from(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn default_deriver_joins_typename_and_id() {
        let deriver = TypenameId::default();
        let key = deriver.derive_key(&object(json!({"__typename": "Person", "id": "1"})));
        assert_eq!(key, Some(CacheKey::from("Person:1")));
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let deriver = TypenameId::default();
        let key = deriver.derive_key(&object(json!({"__typename": "Pet", "id": 42})));
        assert_eq!(key.as_ref().map(CacheKey::as_str), Some("Pet:42"));
    }

    #[test]
    fn missing_identity_fields_yield_none() {
        let deriver = TypenameId::default();
        assert_eq!(deriver.derive_key(&object(json!({"id": "1"}))), None);
        assert_eq!(deriver.derive_key(&object(json!({"__typename": "Person"}))), None);
        assert_eq!(
            deriver.derive_key(&object(json!({"__typename": "Person", "id": null}))),
            None
        );
        assert_eq!(
            deriver.derive_key(&object(json!({"__typename": 3, "id": "1"}))),
            None
        );
    }

    #[test]
    fn composite_ids_join_in_order() {
        let deriver = TypenameId::new("__typename", ["org", "slug"]);
        let key = deriver.derive_key(&object(
            json!({"slug": "docs", "__typename": "Repo", "org": "acme"}),
        ));
        assert_eq!(key, Some(CacheKey::from("Repo:acme:docs")));
    }

    #[test]
    fn closures_are_derivers() {
        let deriver = |obj: &Map<String, Value>| {
            obj.get("uuid").and_then(Value::as_str).map(CacheKey::from)
        };
        let key = deriver.derive_key(&object(json!({"uuid": "abc"})));
        assert_eq!(key, Some(CacheKey::from("abc")));
    }

    #[test]
    fn typename_part_of_key() {
        assert_eq!(CacheKey::from("Person:1").typename(), Some("Person"));
        assert_eq!(CacheKey::from("ROOT_QUERY").typename(), None);
    }
}
