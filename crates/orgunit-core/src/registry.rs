//! Entity type registry and entity loading seams.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::config::RegistryConfig;
use crate::model::EntityRef;

/// Decides which entity type identifiers may be attached to units.
pub trait EntityTypeRegistry: Send + Sync {
    fn is_registered(&self, entity_type: &str) -> bool;
}

impl<F> EntityTypeRegistry for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_registered(&self, entity_type: &str) -> bool {
        self(entity_type)
    }
}

/// Set-backed registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticRegistry {
    types: BTreeSet<String>,
}

impl StaticRegistry {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::default();
        for entity_type in types {
            registry.register(entity_type);
        }
        registry
    }

    /// Build from the `[registry]` config section.
    #[must_use]
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.entity_types.iter().cloned())
    }

    /// Add a type. Blank identifiers are ignored.
    pub fn register(&mut self, entity_type: impl Into<String>) -> &mut Self {
        let entity_type = entity_type.into();
        let trimmed = entity_type.trim();
        if !trimmed.is_empty() {
            self.types.insert(trimmed.to_string());
        }
        self
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(String::as_str)
    }
}

impl EntityTypeRegistry for StaticRegistry {
    fn is_registered(&self, entity_type: &str) -> bool {
        self.types.contains(entity_type)
    }
}

/// Resolves entity references into payloads for tree views.
///
/// `Ok(None)` means the entity no longer exists; the tree keeps the unit and
/// leaves its entity empty.
pub trait EntityLoader: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the backing source cannot be queried.
    fn load(&self, entity: &EntityRef) -> anyhow::Result<Option<Value>>;
}
