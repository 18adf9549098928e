//! Normalized Field Values
//!
//! Payloads arrive as plain JSON trees. Once normalized, every field of an
//! entity holds a [`FieldValue`]: a scalar, a reference to another entity by
//! key, a list, or an anonymous object that has no identity of its own.
//!
//! The discrimination happens at merge time by inspecting the payload, so the
//! cache never needs a schema.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::key::CacheKey;

/// Contents of a field cell. `None` means the field was never populated
/// ("undefined"), which is distinct from an explicit `null`.
pub type FieldSlot = Option<FieldValue>;

/// Field name used when a reference is rendered as plain JSON without being
/// resolved.
pub const REF_MARKER: &str = "__ref";

/// A leaf value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl Scalar {
    /// Convert a JSON leaf. Returns `None` for arrays and objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// The scalar as plain JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

/// A normalized value stored in an entity field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Scalar(Scalar),
    /// Pointer to another entity. The store is an arena: references are keys,
    /// never owning links, so cyclic entity graphs need no special handling.
    Reference(CacheKey),
    List(Vec<FieldValue>),
    /// Nested object without identity, merged by field name.
    Object(IndexMap<String, FieldValue>),
}

impl FieldValue {
    /// Explicit `null`.
    pub fn null() -> Self {
        Self::Scalar(Scalar::Null)
    }

    /// Shorthand for a string scalar.
    pub fn string(s: impl Into<String>) -> Self {
        Self::Scalar(Scalar::String(s.into()))
    }

    /// Shorthand for a reference.
    pub fn reference(key: impl Into<CacheKey>) -> Self {
        Self::Reference(key.into())
    }

    /// The structural shape, used for conflict detection.
    pub fn shape(&self) -> Shape {
        match self {
            Self::Scalar(Scalar::Null) => Shape::Null,
            Self::Scalar(_) => Shape::Scalar,
            Self::Reference(_) => Shape::Reference,
            Self::List(_) => Shape::List,
            Self::Object(_) => Shape::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Scalar::Null))
    }

    pub fn as_reference(&self) -> Option<&CacheKey> {
        match self {
            Self::Reference(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    /// Plain JSON without resolving references; each reference becomes
    /// `{"__ref": "<key>"}`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(scalar) => scalar.to_json(),
            Self::Reference(key) => reference_marker(key),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// Every entity reference in this value, depth-first, in order of
    /// appearance (duplicates included).
    pub fn references(&self) -> Vec<CacheKey> {
        let mut keys = Vec::new();
        crate::traverse::traverse(self, |step| {
            if let Some(key) = step.value.as_reference() {
                keys.push(key.clone());
            }
            true
        });
        keys
    }
}

/// `{"__ref": key}`, the unresolved rendering of a reference.
pub(crate) fn reference_marker(key: &CacheKey) -> Value {
    let mut marker = Map::new();
    marker.insert(REF_MARKER.to_string(), Value::String(key.to_string()));
    Value::Object(marker)
}

/// Coarse structural shape of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Null,
    Scalar,
    Reference,
    List,
    Object,
}

impl Shape {
    /// Shape of a raw payload value. Objects report [`Shape::Object`] whether
    /// or not they carry an identity.
    pub fn of_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Self::Scalar,
            Value::Array(_) => Self::List,
            Value::Object(_) => Self::Object,
        }
    }

    /// Whether a slot holding `self` may be merged with a value of `other`.
    ///
    /// `null` is compatible with everything; entities and anonymous objects
    /// are both objects.
    pub fn compatible_with(self, other: Shape) -> bool {
        match (self, other) {
            (Shape::Null, _) | (_, Shape::Null) => true,
            (Shape::Scalar, Shape::Scalar) | (Shape::List, Shape::List) => true,
            (Shape::Object | Shape::Reference, Shape::Object | Shape::Reference) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Null => "null",
            Shape::Scalar => "scalar",
            Shape::Reference => "reference",
            Shape::List => "list",
            Shape::Object => "object",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_convert_from_json_leaves_only() {
        assert_eq!(Scalar::from_json(&json!(null)), Some(Scalar::Null));
        assert_eq!(Scalar::from_json(&json!("x")), Some(Scalar::String("x".into())));
        assert_eq!(Scalar::from_json(&json!([1])), None);
        assert_eq!(Scalar::from_json(&json!({"a": 1})), None);
    }

    #[test]
    fn references_render_as_markers() {
        let value = FieldValue::List(vec![
            FieldValue::reference("Pet:1"),
            FieldValue::string("loose"),
        ]);
        assert_eq!(value.to_json(), json!([{"__ref": "Pet:1"}, "loose"]));
    }

    #[test]
    fn references_are_collected_in_order() {
        let mut fields = IndexMap::new();
        fields.insert("owner".to_string(), FieldValue::reference("Person:1"));
        fields.insert(
            "pets".to_string(),
            FieldValue::List(vec![
                FieldValue::reference("Pet:1"),
                FieldValue::reference("Pet:2"),
            ]),
        );
        let keys = FieldValue::Object(fields).references();
        let keys: Vec<&str> = keys.iter().map(CacheKey::as_str).collect();
        assert_eq!(keys, vec!["Person:1", "Pet:1", "Pet:2"]);
    }

    #[test]
    fn shape_compatibility() {
        assert!(Shape::Null.compatible_with(Shape::List));
        assert!(Shape::List.compatible_with(Shape::Null));
        assert!(Shape::Reference.compatible_with(Shape::Object));
        assert!(!Shape::List.compatible_with(Shape::Scalar));
        assert!(!Shape::Scalar.compatible_with(Shape::Object));
        assert!(!Shape::Reference.compatible_with(Shape::List));
    }
}
