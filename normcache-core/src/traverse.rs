//! Traversal Engine
//!
//! A depth-first walker over nested mapping/sequence structures. The visitor
//! sees every node (the root included, with an empty path) and decides whether
//! the walk descends into it.
//!
//! The same walker serves payload scans (`&serde_json::Value`), normalized
//! values (`&FieldValue`) and the store-resolving graph used to denormalize
//! entities into plain read views.
//!
//! # Cycles
//!
//! Payload trees cannot be cyclic, but the entity graph can: a person whose
//! best friend lists them back. Each container may report a [`CycleKey`]; when
//! a node's key is already on the current ancestor chain the visitor is called
//! with `revisit = true` and the walk does not descend again.

use std::fmt;

use serde_json::Value;
use smallvec::SmallVec;

use crate::key::CacheKey;
use crate::value::FieldValue;

/// One step in a path from the traversal root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Path from the traversal root. Most response trees are shallow.
pub type Path = SmallVec<[PathSegment; 8]>;

/// Render a path as `a.b.0.c`.
pub fn display_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Identity of a container for cycle detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CycleKey {
    /// Memory address of a borrowed container.
    Address(usize),
    /// An entity reached through a reference.
    Entity(CacheKey),
}

/// A structure the engine can walk.
pub trait Walk: Sized {
    /// Children in container order, or `None` for leaves.
    fn children(&self) -> Option<Vec<(PathSegment, Self)>>;

    /// Identity used by the cycle guard. Leaves need none.
    fn cycle_key(&self) -> Option<CycleKey> {
        None
    }
}

/// What the visitor sees at each node.
pub struct Step<'a, N> {
    /// Path from the root; empty for the root itself.
    pub path: &'a [PathSegment],
    pub value: &'a N,
    /// `None` only for the root.
    pub parent: Option<&'a N>,
    /// The node already appears on the ancestor chain; it will not be
    /// descended into regardless of what the visitor returns.
    pub revisit: bool,
}

impl<N> Step<'_, N> {
    /// The key under which this node sits in its parent.
    pub fn key(&self) -> Option<&PathSegment> {
        self.path.last()
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

/// Walk `root` depth-first, calling `visitor` on every node.
///
/// Returning `false` from the visitor skips that node's children.
pub fn traverse<N, F>(root: N, mut visitor: F)
where
    N: Walk,
    F: FnMut(&Step<'_, N>) -> bool,
{
    let mut path = Path::new();
    let mut ancestors = Vec::new();
    walk(&root, None, &mut path, &mut ancestors, &mut visitor);
}

fn walk<N, F>(
    node: &N,
    parent: Option<&N>,
    path: &mut Path,
    ancestors: &mut Vec<CycleKey>,
    visitor: &mut F,
) where
    N: Walk,
    F: FnMut(&Step<'_, N>) -> bool,
{
    let cycle_key = node.cycle_key();
    let revisit = cycle_key
        .as_ref()
        .is_some_and(|key| ancestors.contains(key));

    let descend = visitor(&Step {
        path,
        value: node,
        parent,
        revisit,
    });
    if revisit || !descend {
        return;
    }

    let Some(children) = node.children() else {
        return;
    };

    let pushed = match cycle_key {
        Some(key) => {
            ancestors.push(key);
            true
        }
        None => false,
    };

    for (segment, child) in children {
        path.push(segment);
        walk(&child, Some(node), path, ancestors, visitor);
        path.pop();
    }

    if pushed {
        ancestors.pop();
    }
}

impl<'a> Walk for &'a Value {
    fn children(&self) -> Option<Vec<(PathSegment, Self)>> {
        match self {
            Value::Array(items) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| (PathSegment::Index(index), item))
                    .collect(),
            ),
            Value::Object(fields) => Some(
                fields
                    .iter()
                    .map(|(name, value)| (PathSegment::Field(name.clone()), value))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn cycle_key(&self) -> Option<CycleKey> {
        match self {
            Value::Array(_) | Value::Object(_) => {
                Some(CycleKey::Address(*self as *const Value as usize))
            }
            _ => None,
        }
    }
}

impl<'a> Walk for &'a FieldValue {
    fn children(&self) -> Option<Vec<(PathSegment, Self)>> {
        match self {
            FieldValue::List(items) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| (PathSegment::Index(index), item))
                    .collect(),
            ),
            FieldValue::Object(fields) => Some(
                fields
                    .iter()
                    .map(|(name, value)| (PathSegment::Field(name.clone()), value))
                    .collect(),
            ),
            FieldValue::Scalar(_) | FieldValue::Reference(_) => None,
        }
    }

    fn cycle_key(&self) -> Option<CycleKey> {
        match self {
            FieldValue::List(_) | FieldValue::Object(_) => {
                Some(CycleKey::Address(*self as *const FieldValue as usize))
            }
            _ => None,
        }
    }
}
