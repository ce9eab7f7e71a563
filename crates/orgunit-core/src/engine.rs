//! The hierarchy engine: public entry point for every operation.
//!
//! Each mutating call runs in one `BEGIN IMMEDIATE` transaction. SQLite
//! grants the write lock before the first read, so validation reads,
//! cycle checks and cascades see a state no other writer can change until
//! commit. Any error drops the transaction, which rolls it back.
//!
//! Reads use the connection directly and may observe concurrent commits
//! between repository calls. Open a read transaction through
//! [`HierarchyEngine::connection`] for a consistent snapshot.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde_json::Value;

use crate::config::{EngineConfig, TreeLimits};
use crate::db::{self, query::SqliteNodeRepository};
use crate::error::{HierarchyError, HierarchyResult};
use crate::hierarchy::{Forest, Navigator, TreeNode, TypeValidator, cascade, mover};
use crate::model::{EntityRef, NewNode, Node, NodeChanges, NodeField, NodeId, PartialRecord};
use crate::registry::{EntityLoader, EntityTypeRegistry, StaticRegistry};
use crate::repository::NodeRepository;

pub struct HierarchyEngine {
    conn: Connection,
    registry: Arc<dyn EntityTypeRegistry>,
    loader: Option<Arc<dyn EntityLoader>>,
    limits: TreeLimits,
}

impl HierarchyEngine {
    /// Open (or create) a file-backed store.
    ///
    /// # Errors
    ///
    /// Returns a store error if the database cannot be opened or migrated.
    pub fn open(
        path: &Path,
        config: &EngineConfig,
        registry: Arc<dyn EntityTypeRegistry>,
    ) -> HierarchyResult<Self> {
        let conn = db::open_store(path, &config.store)?;
        Ok(Self::with_parts(conn, registry, config.limits))
    }

    /// Open a file-backed store with the registry listed in `config`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the database cannot be opened or migrated.
    pub fn from_config(path: &Path, config: &EngineConfig) -> HierarchyResult<Self> {
        let registry = Arc::new(StaticRegistry::from_config(&config.registry));
        Self::open(path, config, registry)
    }

    /// Open a private in-memory store with default limits.
    ///
    /// # Errors
    ///
    /// Returns a store error if SQLite cannot allocate the database.
    pub fn open_in_memory(registry: Arc<dyn EntityTypeRegistry>) -> HierarchyResult<Self> {
        let conn = db::open_in_memory_store()?;
        Ok(Self::with_parts(conn, registry, TreeLimits::default()))
    }

    /// Wrap an existing connection, applying the store pragmas (with
    /// [`db::DEFAULT_BUSY_TIMEOUT`]) and migrating it to the latest schema.
    ///
    /// # Errors
    ///
    /// Returns a store error if configuring or migrating fails.
    pub fn from_connection(
        mut conn: Connection,
        registry: Arc<dyn EntityTypeRegistry>,
        limits: TreeLimits,
    ) -> HierarchyResult<Self> {
        db::configure_connection(&conn, db::DEFAULT_BUSY_TIMEOUT)
            .context("configure sqlite pragmas")?;
        db::migrations::migrate(&mut conn).context("apply store migrations")?;
        Ok(Self::with_parts(conn, registry, limits))
    }

    fn with_parts(
        conn: Connection,
        registry: Arc<dyn EntityTypeRegistry>,
        limits: TreeLimits,
    ) -> Self {
        Self {
            conn,
            registry,
            loader: None,
            limits,
        }
    }

    #[must_use]
    pub fn with_entity_loader(mut self, loader: Arc<dyn EntityLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    #[must_use]
    pub const fn with_limits(mut self, limits: TreeLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub const fn limits(&self) -> TreeLimits {
        self.limits
    }

    /// The underlying connection, for caller-managed read transactions.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn repo(&self) -> SqliteNodeRepository<'_> {
        SqliteNodeRepository::new(&self.conn)
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// Attach a new unit, as a root or under an active parent.
    ///
    /// # Errors
    ///
    /// `InvalidEntityType` before anything is read, `NotFound` for a missing
    /// or deleted parent, `UniquenessViolation` for a sibling collision.
    pub fn create(&mut self, new: NewNode) -> HierarchyResult<Node> {
        TypeValidator::new(self.registry.as_ref()).validate(&new.entity.entity_type)?;

        let created_at = now();
        let node = Node {
            id: NodeId::generate(),
            parent_id: new.parent_id,
            entity: new.entity,
            deleted_at: None,
            created_at,
            updated_at: created_at,
        };

        write_tx(&mut self.conn, "create", |repo| {
            if let Some(parent_id) = &node.parent_id {
                if repo.find_by_id(parent_id, false)?.is_none() {
                    return Err(HierarchyError::NotFound(parent_id.clone()));
                }
            }
            repo.insert(&node)
        })?;

        tracing::info!(
            node_id = %node.id,
            parent_id = node.parent_id.as_ref().map(tracing::field::display),
            entity = %node.entity,
            "created unit"
        );
        Ok(node)
    }

    /// Point an active unit at a different entity.
    ///
    /// # Errors
    ///
    /// `InvalidEntityType`, `NotFound`, or `UniquenessViolation`.
    pub fn update_entity(&mut self, id: &NodeId, entity: EntityRef) -> HierarchyResult<Node> {
        TypeValidator::new(self.registry.as_ref()).validate(&entity.entity_type)?;

        let updated = write_tx(&mut self.conn, "update entity", |repo| {
            if repo.find_by_id(id, false)?.is_none() {
                return Err(HierarchyError::NotFound(id.clone()));
            }
            repo.update(
                id,
                &NodeChanges {
                    parent_id: None,
                    entity: Some(entity),
                    updated_at: now(),
                },
            )?;
            repo.find_by_id(id, false)?
                .ok_or_else(|| HierarchyError::NotFound(id.clone()))
        })?;

        tracing::info!(node_id = %id, entity = %updated.entity, "updated unit entity");
        Ok(updated)
    }

    /// Move `id` under `new_parent`, or to the root level for `None`.
    ///
    /// Returns `false` when the unit already sat there.
    ///
    /// # Errors
    ///
    /// `SelfParent`, `Cycle`, `NotFound`, `UniquenessViolation`.
    pub fn move_node(&mut self, id: &NodeId, new_parent: Option<&NodeId>) -> HierarchyResult<bool> {
        let limits = self.limits;
        let moved = write_tx(&mut self.conn, "move", |repo| {
            mover::move_node(repo, id, new_parent, limits, now())
        })?;

        if moved {
            tracing::info!(
                node_id = %id,
                new_parent = new_parent.map(tracing::field::display),
                "moved unit"
            );
        }
        Ok(moved)
    }

    /// Make `id` a root.
    ///
    /// # Errors
    ///
    /// `NotFound` or `UniquenessViolation` at the root level.
    pub fn detach(&mut self, id: &NodeId) -> HierarchyResult<bool> {
        let limits = self.limits;
        let moved = write_tx(&mut self.conn, "detach", |repo| {
            mover::detach(repo, id, limits, now())
        })?;

        if moved {
            tracing::info!(node_id = %id, "detached unit");
        }
        Ok(moved)
    }

    /// Soft-delete `id` and its whole subtree. Returns the number of units marked.
    ///
    /// # Errors
    ///
    /// `NotFound`, or a traversal error; nothing is written on error.
    pub fn soft_delete(&mut self, id: &NodeId) -> HierarchyResult<usize> {
        let limits = self.limits;
        let affected = write_tx(&mut self.conn, "soft delete", |repo| {
            cascade::soft_delete(repo, id, limits, now())
        })?;
        tracing::info!(node_id = %id, affected, "soft-deleted subtree");
        Ok(affected)
    }

    /// Restore `id` and its deleted descendants. Returns the number restored.
    ///
    /// # Errors
    ///
    /// `NotFound` or `UniquenessViolation`; nothing is written on error.
    pub fn restore(&mut self, id: &NodeId) -> HierarchyResult<usize> {
        let limits = self.limits;
        let affected = write_tx(&mut self.conn, "restore", |repo| {
            cascade::restore(repo, id, limits, now())
        })?;
        tracing::info!(node_id = %id, affected, "restored subtree");
        Ok(affected)
    }

    /// Permanently remove `id` and its subtree. Returns the number removed.
    ///
    /// # Errors
    ///
    /// `NotFound`, or a traversal error; nothing is written on error.
    pub fn force_delete(&mut self, id: &NodeId) -> HierarchyResult<usize> {
        let limits = self.limits;
        let affected = write_tx(&mut self.conn, "force delete", |repo| {
            cascade::force_delete(repo, id, limits)
        })?;
        tracing::info!(node_id = %id, affected, "purged subtree");
        Ok(affected)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub fn find(&self, id: &NodeId) -> HierarchyResult<Option<Node>> {
        self.repo().find_by_id(id, false)
    }

    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub fn find_with_deleted(&self, id: &NodeId) -> HierarchyResult<Option<Node>> {
        self.repo().find_by_id(id, true)
    }

    /// Direct active children of an active unit.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing or deleted unit.
    pub fn children(&self, id: &NodeId) -> HierarchyResult<Vec<Node>> {
        let node = self.navigator().node(id)?;
        self.repo().children_of(Some(&node.id), false)
    }

    /// Active units attached to entities of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub fn by_entity_type(&self, entity_type: &str) -> HierarchyResult<Vec<Node>> {
        self.repo().find_by_entity_type(entity_type, false)
    }

    /// # Errors
    ///
    /// Returns a store error if the count fails.
    pub fn count(&self, include_deleted: bool) -> HierarchyResult<usize> {
        self.repo().count(include_deleted)
    }

    /// Navigator over active units, bounded by the engine limits.
    #[must_use]
    pub fn navigator(&self) -> Navigator<SqliteNodeRepository<'_>> {
        Navigator::new(self.repo(), self.limits)
    }

    /// # Errors
    ///
    /// See [`Navigator::ancestor_chain`].
    pub fn ancestor_chain(&self, id: &NodeId) -> HierarchyResult<Vec<Node>> {
        self.navigator().ancestor_chain(id)
    }

    /// # Errors
    ///
    /// See [`Navigator::descendants`].
    pub fn descendants(&self, id: &NodeId) -> HierarchyResult<Vec<Node>> {
        self.navigator().descendants(id)
    }

    /// # Errors
    ///
    /// See [`Navigator::siblings`].
    pub fn siblings(&self, id: &NodeId) -> HierarchyResult<Vec<Node>> {
        self.navigator().siblings(id)
    }

    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub fn roots(&self) -> HierarchyResult<Vec<Node>> {
        self.navigator().roots()
    }

    /// # Errors
    ///
    /// `NotFound` for a missing or deleted unit.
    pub fn is_root(&self, id: &NodeId) -> HierarchyResult<bool> {
        self.navigator().is_root(id)
    }

    /// # Errors
    ///
    /// `NotFound` for a missing or deleted unit.
    pub fn is_leaf(&self, id: &NodeId) -> HierarchyResult<bool> {
        self.navigator().is_leaf(id)
    }

    /// # Errors
    ///
    /// See [`Navigator::descendants`].
    pub fn descendants_count(&self, id: &NodeId) -> HierarchyResult<usize> {
        self.navigator().descendants_count(id)
    }

    /// # Errors
    ///
    /// See [`Navigator::fields_by_conditions`].
    pub fn fields_by_conditions(
        &self,
        id: &NodeId,
        fields: &[NodeField],
        conditions: &[(NodeField, Value)],
    ) -> HierarchyResult<Vec<PartialRecord>> {
        self.navigator().fields_by_conditions(id, fields, conditions)
    }

    /// Expanded tree of active units.
    ///
    /// With `root`, a single tree for that unit; without, one tree per active
    /// root. `include_entities` resolves entity payloads through the loader.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing root, `EntityLoaderMissing` when entities are
    /// requested without a loader, `EntityLoad` when the loader fails, and
    /// the builder's `CorruptHierarchy` / `TreeTooLarge`.
    pub fn tree(
        &self,
        root: Option<&NodeId>,
        include_entities: bool,
    ) -> HierarchyResult<Vec<TreeNode>> {
        let loader = self.loader_for(include_entities)?;
        let mut trees = match root {
            Some(root) => vec![self.subtree(root)?],
            None => self.forest_trees()?,
        };
        attach_entities(loader, &mut trees)?;

        tracing::debug!(
            roots = trees.len(),
            include_entities,
            "built tree view"
        );
        Ok(trees)
    }

    /// The children of `parent` (or the roots), each fully expanded.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing parent, the entity errors of [`Self::tree`],
    /// or the builder's errors.
    pub fn build_tree(
        &self,
        parent: Option<&NodeId>,
        include_entities: bool,
    ) -> HierarchyResult<Vec<TreeNode>> {
        let loader = self.loader_for(include_entities)?;
        let mut trees = match parent {
            Some(parent) => self.subtree_forest(parent)?.child_trees(parent, self.limits)?,
            None => self.forest_trees()?,
        };
        attach_entities(loader, &mut trees)?;
        Ok(trees)
    }

    /// Rebuild parent/child relations from a flat list, in memory only.
    ///
    /// # Errors
    ///
    /// `CorruptHierarchy` for repeated ids or looping parent links.
    pub fn rebuild_from_flat_list(
        nodes: impl IntoIterator<Item = Node>,
    ) -> HierarchyResult<Forest> {
        Forest::from_nodes(nodes)
    }

    fn subtree_forest(&self, root: &NodeId) -> HierarchyResult<Forest> {
        let root = self.navigator().node(root)?;
        Forest::from_nodes(self.repo().subtree_nodes(&root.id, false)?)
    }

    fn subtree(&self, root: &NodeId) -> HierarchyResult<TreeNode> {
        self.subtree_forest(root)?
            .tree(root, self.limits)?
            .ok_or_else(|| HierarchyError::NotFound(root.clone()))
    }

    fn forest_trees(&self) -> HierarchyResult<Vec<TreeNode>> {
        let forest = Forest::from_nodes(self.repo().all_nodes(false)?)?;
        // active units under a deleted parent stay hidden
        forest.trees_where(self.limits, Node::is_root)
    }

    fn loader_for(&self, include_entities: bool) -> HierarchyResult<Option<&dyn EntityLoader>> {
        if !include_entities {
            return Ok(None);
        }
        self.loader
            .as_deref()
            .map(Some)
            .ok_or(HierarchyError::EntityLoaderMissing)
    }
}

fn attach_entities(
    loader: Option<&dyn EntityLoader>,
    trees: &mut [TreeNode],
) -> HierarchyResult<()> {
    let Some(loader) = loader else {
        return Ok(());
    };
    for tree in trees {
        tree.try_for_each_mut(|t| resolve_entity(loader, t))?;
    }
    Ok(())
}

fn resolve_entity(loader: &dyn EntityLoader, tree: &mut TreeNode) -> HierarchyResult<()> {
    match loader.load(&tree.node.entity) {
        Ok(Some(entity)) => {
            tree.entity = Some(entity);
            Ok(())
        }
        Ok(None) => {
            tracing::warn!(
                node_id = %tree.node.id,
                entity = %tree.node.entity,
                "referenced entity not found"
            );
            Ok(())
        }
        Err(source) => Err(HierarchyError::EntityLoad {
            entity: tree.node.entity.clone(),
            source,
        }),
    }
}

/// Current time at the precision the store keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Run `op` against a repository bound to an immediate transaction and
/// commit on success.
fn write_tx<T>(
    conn: &mut Connection,
    what: &str,
    op: impl FnOnce(&SqliteNodeRepository<'_>) -> HierarchyResult<T>,
) -> HierarchyResult<T> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .with_context(|| format!("begin {what} transaction"))?;
    let value = op(&SqliteNodeRepository::new(&tx)).inspect_err(|err| {
        let code = err.code();
        tracing::debug!(
            code = code.code(),
            summary = code.message(),
            error = %err,
            "{what} rolled back"
        );
    })?;
    tx.commit().with_context(|| format!("commit {what}"))?;
    Ok(value)
}
