//! Read-only traversals over a [`NodeRepository`].
//!
//! Every walk carries a visited set and the configured [`TreeLimits`], so a
//! corrupted parent link fails with
//! [`HierarchyError::CorruptHierarchy`] instead of looping, and a
//! pathological shape fails with [`HierarchyError::TreeTooLarge`].
//!
//! Traversals issue several repository calls and are not snapshot-consistent
//! on their own. Wrap them in a read transaction on the engine's connection
//! if a consistent view is required.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;

use crate::config::TreeLimits;
use crate::error::{HierarchyError, HierarchyResult, TreeLimit};
use crate::model::{Node, NodeField, NodeId, PartialRecord};
use crate::repository::NodeRepository;

/// Traversal entry point. Soft-deleted units are hidden unless
/// [`Navigator::include_deleted`] is set.
pub struct Navigator<R> {
    repo: R,
    limits: TreeLimits,
    include_deleted: bool,
}

impl<R: NodeRepository> Navigator<R> {
    pub const fn new(repo: R, limits: TreeLimits) -> Self {
        Self {
            repo,
            limits,
            include_deleted: false,
        }
    }

    #[must_use]
    pub const fn include_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }

    /// Fetch a visible unit or fail with [`HierarchyError::NotFound`].
    ///
    /// # Errors
    ///
    /// `NotFound` when the unit is missing or hidden.
    pub fn node(&self, id: &NodeId) -> HierarchyResult<Node> {
        self.repo
            .find_by_id(id, self.include_deleted)?
            .ok_or_else(|| HierarchyError::NotFound(id.clone()))
    }

    /// Ancestors from the immediate parent up to the root. Empty for a root.
    ///
    /// A hidden (soft-deleted) ancestor ends the chain, since it is not part
    /// of the visible tree.
    ///
    /// # Errors
    ///
    /// `CorruptHierarchy` on a revisit or a dangling parent link,
    /// `TreeTooLarge` when the chain exceeds `max_depth`.
    pub fn ancestor_chain(&self, id: &NodeId) -> HierarchyResult<Vec<Node>> {
        let start = self.node(id)?;
        let mut visited = HashSet::from([start.id.clone()]);
        let mut chain = Vec::new();
        let mut next = start.parent_id;

        while let Some(parent_id) = next.take() {
            if !visited.insert(parent_id.clone()) {
                return Err(HierarchyError::CorruptHierarchy {
                    node_id: parent_id,
                    detail: "parent links loop back on themselves".to_string(),
                });
            }
            if chain.len() >= self.limits.max_depth {
                return Err(HierarchyError::TreeTooLarge {
                    node_id: id.clone(),
                    limit: TreeLimit::Depth,
                    max: self.limits.max_depth,
                });
            }

            let parent = self.repo.find_by_id(&parent_id, true)?.ok_or_else(|| {
                HierarchyError::CorruptHierarchy {
                    node_id: parent_id.clone(),
                    detail: "parent reference points to a missing unit".to_string(),
                }
            })?;
            if parent.is_deleted() && !self.include_deleted {
                break;
            }
            next.clone_from(&parent.parent_id);
            chain.push(parent);
        }

        tracing::debug!(node_id = %id, depth = chain.len(), "resolved ancestor chain");
        Ok(chain)
    }

    /// Every unit below `id`, breadth-first, children in insertion order.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing start unit, `CorruptHierarchy` on a revisit,
    /// `TreeTooLarge` when depth or fan-out exceed the limits.
    pub fn descendants(&self, id: &NodeId) -> HierarchyResult<Vec<Node>> {
        let start = self.node(id)?;
        let mut visited = HashSet::from([start.id.clone()]);
        let mut queue = VecDeque::from([(start.id, 0_usize)]);
        let mut out = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            let children = self.children_checked(&current, depth)?;
            for child in children {
                if !visited.insert(child.id.clone()) {
                    return Err(HierarchyError::CorruptHierarchy {
                        node_id: child.id,
                        detail: "unit reached twice while walking descendants".to_string(),
                    });
                }
                queue.push_back((child.id.clone(), depth + 1));
                out.push(child);
            }
        }

        tracing::debug!(node_id = %id, count = out.len(), "collected descendants");
        Ok(out)
    }

    /// Other units sharing the parent of `id`. Roots are siblings of each other.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing unit.
    pub fn siblings(&self, id: &NodeId) -> HierarchyResult<Vec<Node>> {
        let node = self.node(id)?;
        let mut siblings = self
            .repo
            .children_of(node.parent_id.as_ref(), self.include_deleted)?;
        siblings.retain(|s| s.id != node.id);
        Ok(siblings)
    }

    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub fn roots(&self) -> HierarchyResult<Vec<Node>> {
        self.repo.roots_query(self.include_deleted)
    }

    /// # Errors
    ///
    /// `NotFound` for a missing unit.
    pub fn is_root(&self, id: &NodeId) -> HierarchyResult<bool> {
        Ok(self.node(id)?.is_root())
    }

    /// Answered with a count query; children are not loaded.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing unit.
    pub fn is_leaf(&self, id: &NodeId) -> HierarchyResult<bool> {
        let node = self.node(id)?;
        Ok(self.repo.count_children(&node.id, self.include_deleted)? == 0)
    }

    /// # Errors
    ///
    /// Same as [`Navigator::descendants`].
    pub fn descendants_count(&self, id: &NodeId) -> HierarchyResult<usize> {
        self.descendants(id).map(|d| d.len())
    }

    /// Depth-first pre-order search starting at `id` (inclusive).
    ///
    /// Each unit matching every condition contributes the projection of
    /// `fields`; the walk continues below matching and non-matching units
    /// alike. Values compare strictly: `json!(7)` does not match `"7"`.
    ///
    /// # Errors
    ///
    /// Same as [`Navigator::descendants`].
    pub fn fields_by_conditions(
        &self,
        id: &NodeId,
        fields: &[NodeField],
        conditions: &[(NodeField, Value)],
    ) -> HierarchyResult<Vec<PartialRecord>> {
        let start = self.node(id)?;
        let mut visited = HashSet::from([start.id.clone()]);
        let mut stack = vec![(start, 0_usize)];
        let mut records = Vec::new();

        while let Some((node, depth)) = stack.pop() {
            if node.matches(conditions) {
                records.push(node.project(fields));
            }

            let children = self.children_checked(&node.id, depth)?;
            for child in children.into_iter().rev() {
                if !visited.insert(child.id.clone()) {
                    return Err(HierarchyError::CorruptHierarchy {
                        node_id: child.id,
                        detail: "unit reached twice during conditional search".to_string(),
                    });
                }
                stack.push((child, depth + 1));
            }
        }

        tracing::debug!(node_id = %id, matches = records.len(), "conditional search done");
        Ok(records)
    }

    fn children_checked(&self, parent: &NodeId, depth: usize) -> HierarchyResult<Vec<Node>> {
        let children = self.repo.children_of(Some(parent), self.include_deleted)?;
        if children.is_empty() {
            return Ok(children);
        }
        if children.len() > self.limits.max_fan_out {
            return Err(HierarchyError::TreeTooLarge {
                node_id: parent.clone(),
                limit: TreeLimit::FanOut,
                max: self.limits.max_fan_out,
            });
        }
        if depth >= self.limits.max_depth {
            return Err(HierarchyError::TreeTooLarge {
                node_id: parent.clone(),
                limit: TreeLimit::Depth,
                max: self.limits.max_depth,
            });
        }
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{migrations, query::SqliteNodeRepository};
    use rusqlite::{Connection, params};
    use serde_json::json;

    fn test_db() -> Connection {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        migrations::migrate(&mut conn).expect("migrate");
        conn
    }

    fn insert_unit(conn: &Connection, id: &str, parent: Option<&str>, entity_id: &str) {
        conn.execute(
            "INSERT INTO organisational_units \
             (id, parent_id, entity_type, entity_id, created_at_us, updated_at_us) \
             VALUES (?1, ?2, 'A', ?3, 1000, 1000)",
            params![id, parent, entity_id],
        )
        .expect("insert unit");
    }

    fn mark_deleted(conn: &Connection, id: &str) {
        conn.execute(
            "UPDATE organisational_units SET deleted_at_us = 5000 WHERE id = ?1",
            params![id],
        )
        .expect("mark deleted");
    }

    /// R → C1 → G, R → C2
    fn scenario_db() -> Connection {
        let conn = test_db();
        insert_unit(&conn, "R", None, "1");
        insert_unit(&conn, "C1", Some("R"), "2");
        insert_unit(&conn, "G", Some("C1"), "3");
        insert_unit(&conn, "C2", Some("R"), "4");
        conn
    }

    fn ids(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    #[test]
    fn scenario_counts_and_relations() {
        let conn = scenario_db();
        let repo = SqliteNodeRepository::new(&conn);
        let nav = Navigator::new(&repo, TreeLimits::default());

        assert_eq!(nav.descendants_count(&id("R")).unwrap(), 3);
        assert!(nav.is_leaf(&id("G")).unwrap());
        assert!(!nav.is_leaf(&id("C1")).unwrap());
        assert_eq!(ids(&nav.siblings(&id("C1")).unwrap()), ["C2"]);
        assert_eq!(ids(&nav.ancestor_chain(&id("G")).unwrap()), ["C1", "R"]);
        assert!(nav.is_root(&id("R")).unwrap());
        assert!(!nav.is_root(&id("G")).unwrap());
    }

    #[test]
    fn descendants_are_breadth_first() {
        let conn = scenario_db();
        let repo = SqliteNodeRepository::new(&conn);
        let nav = Navigator::new(&repo, TreeLimits::default());
        assert_eq!(ids(&nav.descendants(&id("R")).unwrap()), ["C1", "C2", "G"]);
        assert!(nav.descendants(&id("G")).unwrap().is_empty());
    }

    #[test]
    fn root_has_empty_chain() {
        let conn = scenario_db();
        let repo = SqliteNodeRepository::new(&conn);
        let nav = Navigator::new(&repo, TreeLimits::default());
        assert!(nav.ancestor_chain(&id("R")).unwrap().is_empty());
    }

    #[test]
    fn roots_are_siblings_of_each_other() {
        let conn = scenario_db();
        insert_unit(&conn, "R2", None, "9");
        let repo = SqliteNodeRepository::new(&conn);
        let nav = Navigator::new(&repo, TreeLimits::default());
        assert_eq!(ids(&nav.siblings(&id("R")).unwrap()), ["R2"]);
        assert_eq!(ids(&nav.roots().unwrap()), ["R", "R2"]);
    }

    #[test]
    fn deleted_units_hidden_by_default() {
        let conn = scenario_db();
        mark_deleted(&conn, "C2");
        let repo = SqliteNodeRepository::new(&conn);

        let nav = Navigator::new(&repo, TreeLimits::default());
        assert_eq!(nav.descendants_count(&id("R")).unwrap(), 2);
        assert!(nav.siblings(&id("C1")).unwrap().is_empty());
        assert!(matches!(
            nav.is_leaf(&id("C2")).unwrap_err(),
            HierarchyError::NotFound(_)
        ));

        let nav = Navigator::new(&repo, TreeLimits::default()).include_deleted(true);
        assert_eq!(nav.descendants_count(&id("R")).unwrap(), 3);
        assert_eq!(ids(&nav.siblings(&id("C1")).unwrap()), ["C2"]);
    }

    #[test]
    fn hidden_ancestor_ends_chain() {
        let conn = scenario_db();
        mark_deleted(&conn, "R");
        let repo = SqliteNodeRepository::new(&conn);

        let nav = Navigator::new(&repo, TreeLimits::default());
        assert_eq!(ids(&nav.ancestor_chain(&id("G")).unwrap()), ["C1"]);

        let nav = nav.include_deleted(true);
        assert_eq!(ids(&nav.ancestor_chain(&id("G")).unwrap()), ["C1", "R"]);
    }

    #[test]
    fn stored_loop_is_corrupt_hierarchy() {
        let conn = test_db();
        insert_unit(&conn, "a", None, "1");
        insert_unit(&conn, "b", Some("a"), "2");
        insert_unit(&conn, "c", Some("b"), "3");
        conn.execute(
            "UPDATE organisational_units SET parent_id = 'c' WHERE id = 'a'",
            [],
        )
        .unwrap();
        let repo = SqliteNodeRepository::new(&conn);
        let nav = Navigator::new(&repo, TreeLimits::default());

        assert!(matches!(
            nav.ancestor_chain(&id("c")).unwrap_err(),
            HierarchyError::CorruptHierarchy { .. }
        ));
        assert!(matches!(
            nav.descendants(&id("a")).unwrap_err(),
            HierarchyError::CorruptHierarchy { .. }
        ));
        assert!(matches!(
            nav.fields_by_conditions(&id("a"), &[NodeField::Id], &[])
                .unwrap_err(),
            HierarchyError::CorruptHierarchy { .. }
        ));
    }

    #[test]
    fn dangling_parent_is_corrupt_hierarchy() {
        let conn = test_db();
        insert_unit(&conn, "orphan", None, "1");
        // bundled SQLite defaults foreign keys to on; turn them off so the
        // dangling parent link can be written
        conn.pragma_update(None, "foreign_keys", "OFF")
            .expect("disable foreign keys");
        conn.execute(
            "UPDATE organisational_units SET parent_id = 'gone' WHERE id = 'orphan'",
            [],
        )
        .unwrap();
        let repo = SqliteNodeRepository::new(&conn);
        let nav = Navigator::new(&repo, TreeLimits::default());

        let err = nav.ancestor_chain(&id("orphan")).unwrap_err();
        assert!(
            matches!(&err, HierarchyError::CorruptHierarchy { node_id, .. } if node_id.as_str() == "gone"),
            "got {err:?}"
        );
    }

    #[test]
    fn limits_bound_traversals() {
        let conn = scenario_db();
        let repo = SqliteNodeRepository::new(&conn);
        let tight = TreeLimits {
            max_depth: 1,
            max_fan_out: 10,
        };
        let nav = Navigator::new(&repo, tight);
        assert!(matches!(
            nav.ancestor_chain(&id("G")).unwrap_err(),
            HierarchyError::TreeTooLarge {
                limit: TreeLimit::Depth,
                ..
            }
        ));
        assert!(matches!(
            nav.descendants(&id("R")).unwrap_err(),
            HierarchyError::TreeTooLarge {
                limit: TreeLimit::Depth,
                ..
            }
        ));
        assert_eq!(nav.descendants_count(&id("C1")).unwrap(), 1);

        let narrow = TreeLimits {
            max_depth: 10,
            max_fan_out: 1,
        };
        let nav = Navigator::new(&repo, narrow);
        assert!(matches!(
            nav.descendants(&id("R")).unwrap_err(),
            HierarchyError::TreeTooLarge {
                limit: TreeLimit::FanOut,
                ..
            }
        ));
    }

    #[test]
    fn fields_by_conditions_walks_pre_order() {
        let conn = scenario_db();
        let repo = SqliteNodeRepository::new(&conn);
        let nav = Navigator::new(&repo, TreeLimits::default());

        let all = nav
            .fields_by_conditions(&id("R"), &[NodeField::Id], &[])
            .unwrap();
        let visited: Vec<_> = all.iter().map(|r| r[&NodeField::Id].clone()).collect();
        assert_eq!(visited, [json!("R"), json!("C1"), json!("G"), json!("C2")]);

        let matches = nav
            .fields_by_conditions(
                &id("R"),
                &[NodeField::Id, NodeField::ParentId],
                &[(NodeField::ParentId, json!("R"))],
            )
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0][&NodeField::Id], json!("C1"));
        assert_eq!(matches[1][&NodeField::Id], json!("C2"));
        assert_eq!(matches[1][&NodeField::ParentId], json!("R"));
    }

    #[test]
    fn fields_by_conditions_descends_below_non_matches() {
        let conn = scenario_db();
        let repo = SqliteNodeRepository::new(&conn);
        let nav = Navigator::new(&repo, TreeLimits::default());

        let found = nav
            .fields_by_conditions(
                &id("R"),
                &[NodeField::EntityId],
                &[(NodeField::EntityId, json!("3"))],
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0][&NodeField::EntityId], json!("3"));

        // strict comparison
        let none = nav
            .fields_by_conditions(
                &id("R"),
                &[NodeField::EntityId],
                &[(NodeField::EntityId, json!(3))],
            )
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn missing_start_is_not_found() {
        let conn = test_db();
        let repo = SqliteNodeRepository::new(&conn);
        let nav = Navigator::new(&repo, TreeLimits::default());
        assert!(matches!(
            nav.descendants(&id("nope")).unwrap_err(),
            HierarchyError::NotFound(_)
        ));
        assert!(matches!(
            nav.ancestor_chain(&id("nope")).unwrap_err(),
            HierarchyError::NotFound(_)
        ));
    }
}
