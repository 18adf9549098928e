//! Cache configuration.
//!
//! [`CacheOptions`] holds the plain settings and can be loaded from JSON.
//! [`CacheConfig`] adds the hooks that only exist in code: a custom key
//! deriver, a cell adapter for another reactivity runtime, and the equality
//! policy new cells compare with.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::key::{KeyDeriver, TypenameId};
use crate::reactive::{CellAdapter, Equality, SignalAdapter};

/// Serializable cache settings.
///
/// ```rust
/// use normcache_core::client::CacheOptions;
///
/// let options = CacheOptions::from_json(r#"{"id_fields": ["slug"]}"#).unwrap();
/// assert_eq!(options.typename_field, "__typename");
/// assert_eq!(options.id_fields, vec!["slug"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheOptions {
    /// Field naming an object's type.
    pub typename_field: String,
    /// Fields that together identify an object of a given type.
    pub id_fields: Vec<String>,
    /// Entity that anonymous query roots are merged into.
    pub root_key: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            typename_field: "__typename".to_string(),
            id_fields: vec!["id".to_string()],
            root_key: "ROOT_QUERY".to_string(),
        }
    }
}

impl CacheOptions {
    /// Parse and validate options. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| CacheError::InvalidOptions(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.typename_field.is_empty() {
            return Err(CacheError::InvalidOptions(
                "typename_field must not be empty".to_string(),
            ));
        }
        if self.id_fields.is_empty() || self.id_fields.iter().any(String::is_empty) {
            return Err(CacheError::InvalidOptions(
                "id_fields must name at least one non-empty field".to_string(),
            ));
        }
        if self.root_key.is_empty() {
            return Err(CacheError::InvalidOptions(
                "root_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything a [`Client`](super::Client) is built from.
///
/// Options are validated on the way in, so a config always holds usable
/// settings.
#[derive(Clone, Default)]
pub struct CacheConfig {
    options: CacheOptions,
    key_deriver: Option<Arc<dyn KeyDeriver>>,
    adapter: Option<Arc<dyn CellAdapter>>,
    equality: Equality,
}

impl CacheConfig {
    pub fn new(options: CacheOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            ..Self::default()
        })
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Replace the `typename:id` key scheme.
    pub fn with_key_deriver(mut self, deriver: impl KeyDeriver + 'static) -> Self {
        self.key_deriver = Some(Arc::new(deriver));
        self
    }

    /// Build field cells with `adapter` instead of [`SignalAdapter`].
    pub fn with_adapter(mut self, adapter: impl CellAdapter + 'static) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    pub fn with_equality(mut self, equality: Equality) -> Self {
        self.equality = equality;
        self
    }

    pub fn equality(&self) -> &Equality {
        &self.equality
    }

    /// The configured deriver, or one built from the options.
    pub(crate) fn key_deriver(&self) -> Arc<dyn KeyDeriver> {
        match &self.key_deriver {
            Some(deriver) => Arc::clone(deriver),
            None => Arc::new(TypenameId::new(
                self.options.typename_field.clone(),
                self.options.id_fields.iter().cloned(),
            )),
        }
    }

    pub(crate) fn adapter(&self) -> Arc<dyn CellAdapter> {
        match &self.adapter {
            Some(adapter) => Arc::clone(adapter),
            None => Arc::new(SignalAdapter),
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("options", &self.options)
            .field("custom_key_deriver", &self.key_deriver.is_some())
            .field("custom_adapter", &self.adapter.is_some())
            .field("equality", &self.equality)
            .finish()
    }
}
