//! In-memory forest assembly.
//!
//! Units are grouped by `parent_id` into an index-based arena; nested
//! [`TreeNode`] views are assembled from it without recursion.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::TreeLimits;
use crate::error::{HierarchyError, HierarchyResult, TreeLimit};
use crate::model::{Node, NodeId};

/// A unit with its children expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: Node,
    /// Resolved entity payload, present only when entities were requested
    /// and the loader found one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Value>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        &self.node.id
    }

    /// Number of units in this tree, itself included.
    #[must_use]
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            count += 1;
            stack.extend(tree.children.iter());
        }
        count
    }

    /// Locate a unit anywhere in this tree.
    #[must_use]
    pub fn find(&self, id: &NodeId) -> Option<&Self> {
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            if tree.id() == id {
                return Some(tree);
            }
            stack.extend(tree.children.iter());
        }
        None
    }

    /// Visit every unit in pre-order with mutable access, stopping at the
    /// first error.
    ///
    /// # Errors
    ///
    /// Whatever `visit` returns.
    pub fn try_for_each_mut<E, F>(&mut self, mut visit: F) -> Result<(), E>
    where
        F: FnMut(&mut Self) -> Result<(), E>,
    {
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            visit(tree)?;
            stack.extend(tree.children.iter_mut().rev());
        }
        Ok(())
    }
}

/// Arena of units with parent/child relations stored as indices.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
}

impl Forest {
    /// Group an arbitrary, possibly unordered set of units by `parent_id`.
    ///
    /// Units whose parent is not part of the input become roots. Children
    /// keep their input order.
    ///
    /// # Errors
    ///
    /// `CorruptHierarchy` for a repeated id or for parent links that loop.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> HierarchyResult<Self> {
        let nodes: Vec<Node> = nodes.into_iter().collect();
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(HierarchyError::CorruptHierarchy {
                    node_id: node.id.clone(),
                    detail: "unit id appears more than once".to_string(),
                });
            }
        }

        let mut children = vec![Vec::new(); nodes.len()];
        let mut roots = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            match node.parent_id.as_ref().and_then(|p| index.get(p)) {
                Some(&parent) => children[parent].push(i),
                None => roots.push(i),
            }
        }

        let forest = Self {
            nodes,
            index,
            children,
            roots,
        };
        forest.ensure_acyclic()?;
        Ok(forest)
    }

    // Anything not reachable from a root sits on (or below) a loop.
    fn ensure_acyclic(&self) -> HierarchyResult<()> {
        let mut reached = vec![false; self.nodes.len()];
        let mut stack = self.roots.clone();
        while let Some(i) = stack.pop() {
            reached[i] = true;
            stack.extend(self.children[i].iter().copied());
        }
        match reached.iter().position(|r| !r) {
            Some(i) => Err(HierarchyError::CorruptHierarchy {
                node_id: self.nodes[i].id.clone(),
                detail: "parent links form a loop".to_string(),
            }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.roots.iter().map(|&i| &self.nodes[i])
    }

    /// Direct children of `id`; empty for an unknown id.
    pub fn children(&self, id: &NodeId) -> impl Iterator<Item = &Node> {
        self.index
            .get(id)
            .map(|&i| self.children[i].as_slice())
            .unwrap_or_default()
            .iter()
            .map(|&c| &self.nodes[c])
    }

    /// Expand every root.
    ///
    /// # Errors
    ///
    /// `TreeTooLarge` when a tree exceeds `limits`.
    pub fn trees(&self, limits: TreeLimits) -> HierarchyResult<Vec<TreeNode>> {
        self.assemble(&self.roots, limits)
    }

    /// Expand the roots accepted by `keep`, in one pass over the arena.
    ///
    /// # Errors
    ///
    /// `TreeTooLarge` when a tree exceeds `limits`.
    pub fn trees_where(
        &self,
        limits: TreeLimits,
        mut keep: impl FnMut(&Node) -> bool,
    ) -> HierarchyResult<Vec<TreeNode>> {
        let roots: Vec<usize> = self
            .roots
            .iter()
            .copied()
            .filter(|&i| keep(&self.nodes[i]))
            .collect();
        self.assemble(&roots, limits)
    }

    /// Expand the tree below `id`, or `None` for an unknown id.
    ///
    /// # Errors
    ///
    /// `TreeTooLarge` when the tree exceeds `limits`.
    pub fn tree(&self, id: &NodeId, limits: TreeLimits) -> HierarchyResult<Option<TreeNode>> {
        let Some(&i) = self.index.get(id) else {
            return Ok(None);
        };
        Ok(self.assemble(&[i], limits)?.pop())
    }

    /// Expand each direct child of `id`; empty for an unknown id.
    ///
    /// # Errors
    ///
    /// `TreeTooLarge` when a tree exceeds `limits`.
    pub fn child_trees(&self, id: &NodeId, limits: TreeLimits) -> HierarchyResult<Vec<TreeNode>> {
        match self.index.get(id) {
            Some(&i) => self.assemble(&self.children[i], limits),
            None => Ok(Vec::new()),
        }
    }

    // `starts` must be disjoint subtrees (roots, or siblings).
    fn assemble(&self, starts: &[usize], limits: TreeLimits) -> HierarchyResult<Vec<TreeNode>> {
        // pre-order with depth checks, then build bottom-up in reverse
        let mut order = Vec::new();
        let mut stack: Vec<(usize, usize)> = starts.iter().map(|&i| (i, 0)).collect();
        while let Some((i, depth)) = stack.pop() {
            let kids = &self.children[i];
            if !kids.is_empty() {
                if kids.len() > limits.max_fan_out {
                    return Err(self.too_large(i, TreeLimit::FanOut, limits.max_fan_out));
                }
                if depth >= limits.max_depth {
                    return Err(self.too_large(i, TreeLimit::Depth, limits.max_depth));
                }
            }
            order.push(i);
            stack.extend(kids.iter().map(|&c| (c, depth + 1)));
        }

        let mut built: HashMap<usize, TreeNode> = HashMap::with_capacity(order.len());
        for &i in order.iter().rev() {
            let children = self.children[i]
                .iter()
                .filter_map(|&c| built.remove(&c))
                .collect();
            built.insert(
                i,
                TreeNode {
                    node: self.nodes[i].clone(),
                    entity: None,
                    children,
                },
            );
        }

        starts
            .iter()
            .map(|&start| {
                built
                    .remove(&start)
                    .ok_or_else(|| HierarchyError::CorruptHierarchy {
                        node_id: self.nodes[start].id.clone(),
                        detail: "tree assembly lost its root".to_string(),
                    })
            })
            .collect()
    }

    fn too_large(&self, i: usize, limit: TreeLimit, max: usize) -> HierarchyError {
        HierarchyError::TreeTooLarge {
            node_id: self.nodes[i].id.clone(),
            limit,
            max,
        }
    }
}
