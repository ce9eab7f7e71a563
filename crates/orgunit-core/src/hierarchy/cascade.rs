//! Lifecycle cascades across a subtree.
//!
//! Each cascade first reads the whole subtree (soft-deleted units included)
//! and only then writes. The caller runs it inside one transaction, so the
//! store shows either none or all of the changes.

use chrono::{DateTime, Utc};

use super::navigator::Navigator;
use crate::config::TreeLimits;
use crate::error::{HierarchyError, HierarchyResult};
use crate::model::{Node, NodeId};
use crate::repository::NodeRepository;

/// `id` followed by its descendants in breadth-first order, deleted or not.
fn collect_subtree<R: NodeRepository + ?Sized>(
    repo: &R,
    id: &NodeId,
    limits: TreeLimits,
) -> HierarchyResult<Vec<Node>> {
    let navigator = Navigator::new(repo, limits).include_deleted(true);
    let root = navigator.node(id)?;
    let mut subtree = vec![root];
    subtree.extend(navigator.descendants(id)?);
    Ok(subtree)
}

/// Mark `id` and every descendant deleted with one shared timestamp.
///
/// Already-deleted units are re-marked. Returns the number of units marked.
///
/// # Errors
///
/// `NotFound` for an unknown id, or any traversal error.
pub fn soft_delete<R: NodeRepository + ?Sized>(
    repo: &R,
    id: &NodeId,
    limits: TreeLimits,
    at: DateTime<Utc>,
) -> HierarchyResult<usize> {
    let subtree = collect_subtree(repo, id, limits)?;
    for node in &subtree {
        repo.soft_delete(&node.id, at)?;
    }
    Ok(subtree.len())
}

/// Clear the deleted marker on `id` and every deleted descendant, including
/// descendants deleted independently before the cascade.
///
/// Restoring an active unit changes nothing and returns 0.
///
/// # Errors
///
/// `NotFound` for an unknown id, `UniquenessViolation` when a restored unit
/// collides with an active sibling.
pub fn restore<R: NodeRepository + ?Sized>(
    repo: &R,
    id: &NodeId,
    limits: TreeLimits,
    at: DateTime<Utc>,
) -> HierarchyResult<usize> {
    let node = repo
        .find_by_id(id, true)?
        .ok_or_else(|| HierarchyError::NotFound(id.clone()))?;
    if !node.is_deleted() {
        return Ok(0);
    }

    let mut restored = 0;
    for node in collect_subtree(repo, id, limits)? {
        if node.is_deleted() {
            repo.restore(&node.id, at)?;
            restored += 1;
        }
    }
    Ok(restored)
}

/// Permanently remove `id` and its descendants, children before parents.
///
/// # Errors
///
/// `NotFound` for an unknown id, or any traversal error.
pub fn force_delete<R: NodeRepository + ?Sized>(
    repo: &R,
    id: &NodeId,
    limits: TreeLimits,
) -> HierarchyResult<usize> {
    let subtree = collect_subtree(repo, id, limits)?;
    // breadth-first puts every parent before its children
    for node in subtree.iter().rev() {
        repo.hard_delete(&node.id)?;
    }
    Ok(subtree.len())
}
