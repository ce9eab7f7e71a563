use crate::error::{HierarchyError, HierarchyResult};
use crate::registry::EntityTypeRegistry;

/// Checks entity types against a registry before anything is written.
#[derive(Clone, Copy)]
pub struct TypeValidator<'a> {
    registry: &'a dyn EntityTypeRegistry,
}

impl<'a> TypeValidator<'a> {
    #[must_use]
    pub const fn new(registry: &'a dyn EntityTypeRegistry) -> Self {
        Self { registry }
    }

    /// # Errors
    ///
    /// [`HierarchyError::InvalidEntityType`] when `entity_type` is blank or
    /// unknown to the registry.
    pub fn validate(&self, entity_type: &str) -> HierarchyResult<()> {
        if entity_type.trim().is_empty() || !self.registry.is_registered(entity_type) {
            return Err(HierarchyError::InvalidEntityType(entity_type.to_string()));
        }
        Ok(())
    }
}
