//! Re-parenting under the acyclicity invariant.
//!
//! The check reads the proposed parent's ancestor chain and the height of
//! the moved subtree, and the write follows in the same transaction. The engine opens that transaction with
//! `BEGIN IMMEDIATE`, so no other writer can interleave between the two.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::config::TreeLimits;
use crate::error::{HierarchyError, HierarchyResult, TreeLimit};
use crate::model::{Node, NodeChanges, NodeId};
use crate::repository::NodeRepository;

/// Move `id` under `new_parent`, or to the root level when `None`.
///
/// Returns `false` when the unit already sits there (nothing is written).
///
/// # Errors
///
/// - `SelfParent` when `new_parent` is `id`, before anything is read
/// - `NotFound` when the unit or the new parent is missing or soft-deleted
/// - `Cycle` when the new parent lies below `id`
/// - `TreeTooLarge` when the moved subtree would end up deeper than
///   `limits.max_depth`
/// - `UniquenessViolation` when the destination already holds the same entity
pub fn move_node<R: NodeRepository + ?Sized>(
    repo: &R,
    id: &NodeId,
    new_parent: Option<&NodeId>,
    limits: TreeLimits,
    at: DateTime<Utc>,
) -> HierarchyResult<bool> {
    if new_parent == Some(id) {
        return Err(HierarchyError::SelfParent(id.clone()));
    }

    let node = repo
        .find_by_id(id, false)?
        .ok_or_else(|| HierarchyError::NotFound(id.clone()))?;
    if node.parent_id.as_ref() == new_parent {
        return Ok(false);
    }

    if let Some(parent_id) = new_parent {
        let parent = repo
            .find_by_id(parent_id, false)?
            .ok_or_else(|| HierarchyError::NotFound(parent_id.clone()))?;
        let parent_depth = ensure_outside_subtree(repo, id, &parent, limits)?;
        let deepest = parent_depth + 1 + subtree_height(repo, id, limits)?;
        if deepest > limits.max_depth {
            return Err(HierarchyError::TreeTooLarge {
                node_id: id.clone(),
                limit: TreeLimit::Depth,
                max: limits.max_depth,
            });
        }
    }

    repo.update(
        id,
        &NodeChanges {
            parent_id: Some(new_parent.cloned()),
            entity: None,
            updated_at: at,
        },
    )?;
    Ok(true)
}

/// Move `id` to the root level. No cycle walk is needed.
///
/// # Errors
///
/// Same as [`move_node`] minus the cycle cases.
pub fn detach<R: NodeRepository + ?Sized>(
    repo: &R,
    id: &NodeId,
    limits: TreeLimits,
    at: DateTime<Utc>,
) -> HierarchyResult<bool> {
    move_node(repo, id, None, limits, at)
}

/// Walk from `parent` to its root and fail if `id` is met on the way.
/// Returns the number of ancestors above `parent`.
fn ensure_outside_subtree<R: NodeRepository + ?Sized>(
    repo: &R,
    id: &NodeId,
    parent: &Node,
    limits: TreeLimits,
) -> HierarchyResult<usize> {
    let mut visited = HashSet::from([parent.id.clone()]);
    let mut next = parent.parent_id.clone();
    let mut depth = 0_usize;

    while let Some(ancestor_id) = next.take() {
        if &ancestor_id == id {
            return Err(HierarchyError::Cycle {
                node_id: id.clone(),
                proposed_parent: parent.id.clone(),
            });
        }
        if !visited.insert(ancestor_id.clone()) {
            return Err(HierarchyError::CorruptHierarchy {
                node_id: ancestor_id,
                detail: "parent links loop back on themselves".to_string(),
            });
        }
        depth += 1;
        if depth > limits.max_depth {
            return Err(HierarchyError::TreeTooLarge {
                node_id: parent.id.clone(),
                limit: TreeLimit::Depth,
                max: limits.max_depth,
            });
        }

        let ancestor = repo.find_by_id(&ancestor_id, true)?.ok_or_else(|| {
            HierarchyError::CorruptHierarchy {
                node_id: ancestor_id.clone(),
                detail: "parent reference points to a missing unit".to_string(),
            }
        })?;
        next = ancestor.parent_id;
    }
    Ok(depth)
}

/// Levels of active units below `id`; 0 for a leaf.
fn subtree_height<R: NodeRepository + ?Sized>(
    repo: &R,
    id: &NodeId,
    limits: TreeLimits,
) -> HierarchyResult<usize> {
    let mut seen = HashSet::from([id.clone()]);
    let mut level = vec![id.clone()];
    let mut height = 0_usize;

    loop {
        let mut next = Vec::new();
        for parent in &level {
            for child in repo.children_of(Some(parent), false)? {
                if !seen.insert(child.id.clone()) {
                    return Err(HierarchyError::CorruptHierarchy {
                        node_id: child.id,
                        detail: "unit reached twice below the moved unit".to_string(),
                    });
                }
                next.push(child.id);
            }
        }
        if next.is_empty() {
            return Ok(height);
        }
        height += 1;
        if height > limits.max_depth {
            return Err(HierarchyError::TreeTooLarge {
                node_id: id.clone(),
                limit: TreeLimit::Depth,
                max: limits.max_depth,
            });
        }
        level = next;
    }
}
