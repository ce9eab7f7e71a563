//! Persistence interface consumed by the hierarchy modules.
//!
//! Every traversal and cascade in [`crate::hierarchy`] talks to storage only
//! through [`NodeRepository`]. The bundled implementation is
//! [`crate::db::query::SqliteNodeRepository`]; it can be built over a plain
//! connection or over an open transaction, which is how the engine makes a
//! multi-step mutation atomic.

use chrono::{DateTime, Utc};

use crate::error::HierarchyResult;
use crate::model::{Node, NodeChanges, NodeId};

/// Storage of organisational units.
///
/// Lists are returned in insertion order. `include_deleted = false` hides
/// soft-deleted rows.
pub trait NodeRepository {
    /// Persist a new unit.
    ///
    /// # Errors
    ///
    /// [`crate::HierarchyError::UniquenessViolation`] when an active sibling
    /// already references the same entity.
    fn insert(&self, node: &Node) -> HierarchyResult<()>;

    /// Fetch one unit by id.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    fn find_by_id(&self, id: &NodeId, include_deleted: bool) -> HierarchyResult<Option<Node>>;

    /// Direct children of `parent`, or the roots when `parent` is `None`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    fn children_of(
        &self,
        parent: Option<&NodeId>,
        include_deleted: bool,
    ) -> HierarchyResult<Vec<Node>>;

    /// Number of direct children of `parent`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the count fails.
    fn count_children(&self, parent: &NodeId, include_deleted: bool) -> HierarchyResult<usize>;

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// [`crate::HierarchyError::NotFound`] for an unknown id,
    /// [`crate::HierarchyError::UniquenessViolation`] when the change collides
    /// with an active sibling.
    fn update(&self, id: &NodeId, changes: &NodeChanges) -> HierarchyResult<()>;

    /// Set the soft-delete marker of one unit.
    ///
    /// # Errors
    ///
    /// [`crate::HierarchyError::NotFound`] for an unknown id.
    fn soft_delete(&self, id: &NodeId, at: DateTime<Utc>) -> HierarchyResult<()>;

    /// Clear the soft-delete marker of one unit.
    ///
    /// # Errors
    ///
    /// [`crate::HierarchyError::NotFound`] for an unknown id,
    /// [`crate::HierarchyError::UniquenessViolation`] when an active sibling
    /// took the same entity in the meantime.
    fn restore(&self, id: &NodeId, at: DateTime<Utc>) -> HierarchyResult<()>;

    /// Remove one unit permanently. Its children must already be gone.
    ///
    /// # Errors
    ///
    /// [`crate::HierarchyError::NotFound`] for an unknown id.
    fn hard_delete(&self, id: &NodeId) -> HierarchyResult<()>;

    /// Units without a parent.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    fn roots_query(&self, include_deleted: bool) -> HierarchyResult<Vec<Node>>;

    /// Every stored unit.
    ///
    /// # Errors
    ///
    /// Returns a store error if the scan fails.
    fn all_nodes(&self, include_deleted: bool) -> HierarchyResult<Vec<Node>>;

    /// `root` and everything reachable below it in one fetch.
    ///
    /// Empty when `root` is unknown (or soft-deleted and hidden).
    ///
    /// # Errors
    ///
    /// Returns a store error if the fetch fails.
    fn subtree_nodes(&self, root: &NodeId, include_deleted: bool) -> HierarchyResult<Vec<Node>>;

    /// Units attached to entities of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    fn find_by_entity_type(
        &self,
        entity_type: &str,
        include_deleted: bool,
    ) -> HierarchyResult<Vec<Node>>;

    /// Number of stored units.
    ///
    /// # Errors
    ///
    /// Returns a store error if the count fails.
    fn count(&self, include_deleted: bool) -> HierarchyResult<usize>;
}

impl<R: NodeRepository + ?Sized> NodeRepository for &R {
    fn insert(&self, node: &Node) -> HierarchyResult<()> {
        (**self).insert(node)
    }

    fn find_by_id(&self, id: &NodeId, include_deleted: bool) -> HierarchyResult<Option<Node>> {
        (**self).find_by_id(id, include_deleted)
    }

    fn children_of(
        &self,
        parent: Option<&NodeId>,
        include_deleted: bool,
    ) -> HierarchyResult<Vec<Node>> {
        (**self).children_of(parent, include_deleted)
    }

    fn count_children(&self, parent: &NodeId, include_deleted: bool) -> HierarchyResult<usize> {
        (**self).count_children(parent, include_deleted)
    }

    fn update(&self, id: &NodeId, changes: &NodeChanges) -> HierarchyResult<()> {
        (**self).update(id, changes)
    }

    fn soft_delete(&self, id: &NodeId, at: DateTime<Utc>) -> HierarchyResult<()> {
        (**self).soft_delete(id, at)
    }

    fn restore(&self, id: &NodeId, at: DateTime<Utc>) -> HierarchyResult<()> {
        (**self).restore(id, at)
    }

    fn hard_delete(&self, id: &NodeId) -> HierarchyResult<()> {
        (**self).hard_delete(id)
    }

    fn roots_query(&self, include_deleted: bool) -> HierarchyResult<Vec<Node>> {
        (**self).roots_query(include_deleted)
    }

    fn all_nodes(&self, include_deleted: bool) -> HierarchyResult<Vec<Node>> {
        (**self).all_nodes(include_deleted)
    }

    fn subtree_nodes(&self, root: &NodeId, include_deleted: bool) -> HierarchyResult<Vec<Node>> {
        (**self).subtree_nodes(root, include_deleted)
    }

    fn find_by_entity_type(
        &self,
        entity_type: &str,
        include_deleted: bool,
    ) -> HierarchyResult<Vec<Node>> {
        (**self).find_by_entity_type(entity_type, include_deleted)
    }

    fn count(&self, include_deleted: bool) -> HierarchyResult<usize> {
        (**self).count(include_deleted)
    }
}
