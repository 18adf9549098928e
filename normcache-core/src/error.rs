//! Error types for cache operations.
//!
//! Only merges and configuration/snapshot decoding can fail. Reads never
//! return errors: a reference to an entity that is not loaded yet resolves
//! to [`ViewValue::Missing`](crate::client::ViewValue::Missing) instead.

use thiserror::Error;

use crate::key::CacheKey;
use crate::value::Shape;

/// Errors produced by the cache.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    /// Incoming data disagrees with the stored shape of the same field.
    ///
    /// This means results of incompatible operations were merged for the same
    /// identity. The merge that raised it did not write anything.
    #[error("identity conflict at {}: stored {stored}, incoming {incoming}", location(.key, .path))]
    IdentityConflict {
        /// Entity owning the conflicting field, `None` for anonymous roots.
        key: Option<CacheKey>,
        /// Dotted path from the entity (or root) to the conflicting slot.
        path: String,
        stored: Shape,
        incoming: Shape,
    },

    /// Cache options could not be parsed.
    #[error("invalid cache options: {0}")]
    InvalidOptions(String),

    /// A snapshot could not be encoded or decoded.
    #[error("snapshot codec error: {0}")]
    Snapshot(String),
}

fn location(key: &Option<CacheKey>, path: &str) -> String {
    let owner = match key {
        Some(key) => key.as_str(),
        None => "<root>",
    };
    if path.is_empty() {
        owner.to_string()
    } else {
        format!("{owner}.{path}")
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;
